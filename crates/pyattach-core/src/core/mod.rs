mod address;
pub(crate) mod macros;
mod thread_id;

pub use self::{
    address::{Address, AddressRange},
    thread_id::ThreadId,
};
