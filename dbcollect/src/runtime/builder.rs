use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::CollectConfig;
use crate::ingest::ArchiveSink;
use crate::planner::MetadataSource;
use crate::session::SessionFactory;
use crate::staging::StagingDir;

use super::supervisor::CollectRuntime;

/// Builder for a [`CollectRuntime`] with explicit dependencies.
///
/// # Example
///
/// ```ignore
/// use dbcollect::runtime::CollectRuntimeBuilder;
///
/// let runtime = CollectRuntimeBuilder::new(config)
///     .with_staging(staging)
///     .with_factory(factory)
///     .with_metadata(metadata)
///     .with_archive(archive)
///     .build()?;
/// ```
pub struct CollectRuntimeBuilder<F, M, A>
where
    F: SessionFactory,
    M: MetadataSource + 'static,
    A: ArchiveSink + 'static,
{
    config: CollectConfig,
    staging: Option<Arc<StagingDir>>,
    factory: Option<Arc<F>>,
    metadata: Option<Arc<M>>,
    archive: Option<Arc<A>>,
}

impl<F, M, A> fmt::Debug for CollectRuntimeBuilder<F, M, A>
where
    F: SessionFactory,
    M: MetadataSource + 'static,
    A: ArchiveSink + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("CollectRuntimeBuilder");
        debug.field("staging_set", &self.staging.is_some());
        debug.field("factory_set", &self.factory.is_some());
        debug.field("metadata_set", &self.metadata.is_some());
        debug.field("archive_set", &self.archive.is_some());

        if self.factory.is_some() {
            debug.field("factory_type", &type_name::<F>());
        }
        if self.metadata.is_some() {
            debug.field("metadata_type", &type_name::<M>());
        }
        if self.archive.is_some() {
            debug.field("archive_type", &type_name::<A>());
        }

        debug.finish()
    }
}

impl<F, M, A> CollectRuntimeBuilder<F, M, A>
where
    F: SessionFactory,
    M: MetadataSource + 'static,
    A: ArchiveSink + 'static,
{
    pub fn new(config: CollectConfig) -> Self {
        Self {
            config,
            staging: None,
            factory: None,
            metadata: None,
            archive: None,
        }
    }

    /// Staging directory shared by all instances of the run.
    pub fn with_staging(mut self, staging: Arc<StagingDir>) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_factory(mut self, factory: Arc<F>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<M>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_archive(mut self, archive: Arc<A>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency is missing or the configuration is
    /// invalid.
    pub fn build(self) -> anyhow::Result<CollectRuntime<F, M, A>> {
        self.config.validate()?;
        let staging = self
            .staging
            .ok_or_else(|| anyhow::anyhow!("staging dependency missing"))?;
        let factory = self
            .factory
            .ok_or_else(|| anyhow::anyhow!("factory dependency missing"))?;
        let metadata = self
            .metadata
            .ok_or_else(|| anyhow::anyhow!("metadata dependency missing"))?;
        let archive = self
            .archive
            .ok_or_else(|| anyhow::anyhow!("archive dependency missing"))?;

        Ok(CollectRuntime::new(self.config, staging, factory, metadata, archive))
    }
}
