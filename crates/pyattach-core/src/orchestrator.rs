use crate::{
    AttachDriver, AttachError, AttachOptions, AttachOutcome, CodeInjector, ImageEnumerator as _,
    InterpreterRecord, InterpreterRegistry, LoadedImage, ThreadId, ThreadingBootstrap,
    TraceInstaller,
    fingerprint::{Fingerprint, classify},
    runtime::{GilGuard, RuntimeBinding, RuntimeLinker},
};

/// Sequences discovery, bootstrap and injection over every runtime image
/// loaded into the process.
pub struct AttachOrchestrator<Driver, Linker>
where
    Driver: AttachDriver,
    Linker: RuntimeLinker,
{
    driver: Driver,
    linker: Linker,
    options: AttachOptions,
    registry: InterpreterRegistry,
}

impl<Driver, Linker> AttachOrchestrator<Driver, Linker>
where
    Driver: AttachDriver,
    Linker: RuntimeLinker,
{
    /// Creates a new orchestrator.
    pub fn new(driver: Driver, linker: Linker, options: AttachOptions) -> Self {
        Self {
            driver,
            linker,
            options,
            registry: InterpreterRegistry::new(),
        }
    }

    /// Returns the driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Returns the options.
    pub fn options(&self) -> &AttachOptions {
        &self.options
    }

    /// Returns the candidates visited by the last call.
    pub fn registry(&self) -> &InterpreterRegistry {
        &self.registry
    }

    /// Attaches to the first runtime that can be brought to a lockable
    /// state and evaluates `source` in it.
    ///
    /// Returns the most specific outcome across all candidates if none
    /// succeeded. Returns an error only if no candidate produced an outcome.
    pub fn run_code(&mut self, source: &str) -> Result<AttachOutcome, AttachError> {
        let injector = CodeInjector::new(&self.options);

        self.attach(|gil| {
            if !injector.inject(gil, source) {
                tracing::warn!("injected code did not compile");
            }

            Ok(())
        })
    }

    /// Attaches to the first runtime that can be brought to a lockable
    /// state and installs a tracer on `thread_id` through `installer`.
    pub fn install_tracer<Installer>(
        &mut self,
        installer: &Installer,
        thread_id: ThreadId,
    ) -> Result<AttachOutcome, AttachError>
    where
        Installer: TraceInstaller<Linker::Api>,
    {
        self.attach(|gil| installer.install(gil, thread_id))
    }

    fn attach(
        &mut self,
        mut payload: impl FnMut(&GilGuard<'_, Linker::Api>) -> Result<(), AttachError>,
    ) -> Result<AttachOutcome, AttachError> {
        self.registry.clear();

        let images = self.driver.images()?;
        let mut local_error = None;

        for image in &images {
            let fingerprint = match classify(&self.driver, &self.linker, image) {
                Ok(Some(fingerprint)) => fingerprint,
                Ok(None) => continue,
                Err(err) => {
                    let fingerprint = Fingerprint {
                        family: None,
                        is_debug: image.is_debug,
                    };

                    local_error = self.record(image, &fingerprint, Err(err)).or(local_error);
                    continue;
                }
            };

            let result = self.attach_image(image, &fingerprint, &mut payload);
            let succeeded = result.is_ok();
            local_error = self.record(image, &fingerprint, result).or(local_error);

            if succeeded {
                tracing::info!(image = %image.name, "attached");
                return Ok(AttachOutcome::Success);
            }
        }

        match (self.registry.most_specific(), local_error) {
            (Some(outcome), _) => {
                tracing::debug!(%outcome, "attach failed");
                Ok(outcome)
            }
            (None, Some(err)) => Err(err),
            (None, None) => Err(AttachError::RuntimeNotFound),
        }
    }

    fn attach_image(
        &self,
        image: &LoadedImage,
        fingerprint: &Fingerprint,
        payload: &mut impl FnMut(&GilGuard<'_, Linker::Api>) -> Result<(), AttachError>,
    ) -> Result<(), AttachError> {
        let family = fingerprint.family.ok_or(AttachError::UnknownVersion)?;
        let binding = RuntimeBinding::resolve(&self.driver, image, family)?;
        let api = self.linker.link(&binding)?;
        let hazard = binding.hazard_range(self.options.hazard_span)?;

        let outcome =
            ThreadingBootstrap::run(&self.driver, &api, family, hazard, self.options.timeout)?;
        tracing::debug!(
            image = %image.name,
            %family,
            is_debug = binding.is_debug(),
            ?outcome,
            "threading online"
        );

        let gil = GilGuard::acquire(&api);
        payload(&gil)
    }

    /// Records the result of one candidate. Returns the error if it has no
    /// outcome.
    fn record(
        &mut self,
        image: &LoadedImage,
        fingerprint: &Fingerprint,
        result: Result<(), AttachError>,
    ) -> Option<AttachError> {
        let (outcome, local_error) = match result {
            Ok(()) => (Some(AttachOutcome::Success), None),
            Err(err) => match AttachOutcome::from_error(&err) {
                Some(outcome) => {
                    tracing::debug!(image = %image.name, %outcome, "candidate failed");
                    (Some(outcome), None)
                }
                None => {
                    tracing::warn!(image = %image.name, %err, "candidate failed");
                    (None, Some(err))
                }
            },
        };

        self.registry.push(InterpreterRecord {
            image: image.clone(),
            family: fingerprint.family,
            is_debug: fingerprint.is_debug,
            outcome,
        });

        local_error
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
