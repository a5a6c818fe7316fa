//! Writing or sending U-Boot to a board.
//!
//! [`ImageWriter`] looks up the board family's [`WriteMethod`] when it is
//! created, so an unknown family is rejected before any hardware is touched.
//! A write is planned as a [`WriteSpec`] first and then carried out stage by
//! stage through the bound storage or emulator capability.

mod methods;
pub mod registry;

pub use registry::{
    Artifact, Blob, SendStage, WriteMethod, WriteMethodRegistration, WriteStage,
    available_methods, is_registered, lookup,
};

use crate::capability::{
    Capability, EmulatorProtocol, FileTarget, ImageTarget, MuxMode, SdMuxProtocol,
    StorageProtocol, UsbLoaderProtocol,
};
use crate::options::WriterOptions;
use bootlab_shared::errors::{BootlabError, BootlabResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where one artifact ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Image(ImageTarget),
    Files(FileTarget),
    Emulator,
}

/// One resolved write stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub role: &'static str,
    pub source: PathBuf,
    pub target: WriteTarget,
}

/// The complete plan for writing one build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSpec {
    pub method: &'static str,
    /// Stages in the order they are written.
    pub stages: Vec<PlannedWrite>,
}

impl WriteSpec {
    /// Map of artifact role to source file.
    pub fn artifacts(&self) -> BTreeMap<&'static str, &Path> {
        self.stages
            .iter()
            .map(|s| (s.role, s.source.as_path()))
            .collect()
    }

    fn needs_storage(&self) -> bool {
        self.stages
            .iter()
            .any(|s| !matches!(s.target, WriteTarget::Emulator))
    }
}

/// One resolved USB send step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    pub role: &'static str,
    pub source: Option<PathBuf>,
    pub phase: Option<&'static str>,
}

/// Writes (or sends) U-Boot using the configured board-family method.
pub struct ImageWriter {
    options: WriterOptions,
    method: &'static WriteMethod,
    storage: Option<Arc<dyn StorageProtocol>>,
    sdmux: Option<Arc<dyn SdMuxProtocol>>,
    emulator: Option<Arc<dyn EmulatorProtocol>>,
    usb_loader: Option<Arc<dyn UsbLoaderProtocol>>,
}

impl ImageWriter {
    /// Create a writer for `options.method`.
    ///
    /// # Errors
    /// * `UnsupportedWriteMethod` - The method is not registered
    pub fn new(options: WriterOptions) -> BootlabResult<Self> {
        let method = registry::lookup(&options.method)?;
        Ok(Self {
            options,
            method,
            storage: None,
            sdmux: None,
            emulator: None,
            usb_loader: None,
        })
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageProtocol>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_sdmux(mut self, sdmux: Arc<dyn SdMuxProtocol>) -> Self {
        self.sdmux = Some(sdmux);
        self
    }

    pub fn with_emulator(mut self, emulator: Arc<dyn EmulatorProtocol>) -> Self {
        self.emulator = Some(emulator);
        self
    }

    pub fn with_usb_loader(mut self, loader: Arc<dyn UsbLoaderProtocol>) -> Self {
        self.usb_loader = Some(loader);
        self
    }

    pub fn method(&self) -> &'static WriteMethod {
        self.method
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Plan writing the build in `image_dir` without touching hardware.
    ///
    /// # Errors
    /// * `UnsupportedWriteMethod` - The method can not write to storage
    /// * `Config` - A vendor blob the method needs is not configured
    pub fn resolve_write(&self, image_dir: &Path) -> BootlabResult<WriteSpec> {
        let stages = self.method.write.ok_or_else(|| self.unsupported("writing"))?;

        let stages = stages
            .iter()
            .map(|stage| self.plan_stage(image_dir, stage))
            .collect::<BootlabResult<Vec<_>>>()?;

        Ok(WriteSpec {
            method: self.method.name,
            stages,
        })
    }

    /// Plan sending the build in `image_dir` over USB.
    ///
    /// # Errors
    /// * `UnsupportedWriteMethod` - The method can not send over USB
    pub fn resolve_send(&self, image_dir: &Path) -> BootlabResult<Vec<PlannedSend>> {
        let stages = self.method.send.ok_or_else(|| self.unsupported("sending"))?;
        Ok(stages
            .iter()
            .map(|stage| PlannedSend {
                role: stage.role,
                source: stage.source.map(|file| image_dir.join(file)),
                phase: stage.phase,
            })
            .collect())
    }

    /// Write U-Boot from `image_dir` to the board's storage.
    ///
    /// With an SD multiplexer bound, the card is switched to the host first
    /// and always handed back to the board afterwards, after a settle delay
    /// so the last write has reached the card. This also happens when a
    /// stage fails.
    pub async fn write(&self, image_dir: &Path) -> BootlabResult<()> {
        let spec = self.resolve_write(image_dir)?;
        tracing::info!(method = spec.method, dir = %image_dir.display(), "Writing U-Boot");

        let Some(sdmux) = &self.sdmux else {
            return self.write_stages(&spec).await;
        };

        let result = match switch_to_host(sdmux.as_ref()).await {
            Ok(()) => self.write_stages(&spec).await,
            Err(e) => Err(e),
        };

        tokio::time::sleep(self.options.settle_delay()).await;
        let restored = sdmux.set_mode(MuxMode::Device).await;

        match (result, restored) {
            (Err(e), Err(restore)) => {
                tracing::warn!("Failed to hand card back to the board: {}", restore);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), restored) => restored,
        }
    }

    async fn write_stages(&self, spec: &WriteSpec) -> BootlabResult<()> {
        let storage = if spec.needs_storage() {
            Some(self.storage.as_ref().ok_or_else(|| {
                BootlabError::capability("storage", format!("method {} writes to storage", spec.method))
            })?)
        } else {
            None
        };

        if let Some(storage) = storage {
            storage.activate().await?;
        }

        let mut result = Ok(());
        for stage in &spec.stages {
            tracing::info!(role = stage.role, source = %stage.source.display(), "Writing stage");
            if let Err(e) = self.write_stage(storage, stage).await {
                result = Err(BootlabError::WriteFailed {
                    method: spec.method.to_string(),
                    stage: stage.role.to_string(),
                    reason: e.to_string(),
                });
                break;
            }
        }

        if let Some(storage) = storage
            && let Err(e) = storage.deactivate().await
        {
            if result.is_ok() {
                return Err(e);
            }
            tracing::warn!("Failed to release storage: {}", e);
        }
        result
    }

    async fn write_stage(
        &self,
        storage: Option<&Arc<dyn StorageProtocol>>,
        stage: &PlannedWrite,
    ) -> BootlabResult<()> {
        match &stage.target {
            WriteTarget::Image(target) => {
                let storage = storage.ok_or_else(|| BootlabError::capability("storage", "not bound"))?;
                storage.write_image(&stage.source, *target).await
            }
            WriteTarget::Files(target) => {
                let storage = storage.ok_or_else(|| BootlabError::capability("storage", "not bound"))?;
                storage
                    .write_files(std::slice::from_ref(&stage.source), target)
                    .await
            }
            WriteTarget::Emulator => {
                let emulator = self
                    .emulator
                    .as_ref()
                    .ok_or_else(|| BootlabError::capability("emulator", "not bound"))?;
                emulator.activate().await?;
                emulator.write_image(&stage.source).await
            }
        }
    }

    /// Send U-Boot from `image_dir` over the USB download link and start it.
    pub async fn send(&self, image_dir: &Path) -> BootlabResult<()> {
        let plan = self.resolve_send(image_dir)?;
        let loader = self.usb_loader.as_ref().ok_or_else(|| {
            BootlabError::capability("usb-loader", format!("method {} sends over USB", self.method.name))
        })?;
        tracing::info!(method = self.method.name, dir = %image_dir.display(), "Sending U-Boot");

        loader.activate().await?;
        for step in &plan {
            tracing::info!(role = step.role, "Sending stage");
            loader
                .load(step.source.as_deref(), step.phase)
                .await
                .map_err(|e| self.send_failed(step.role, e))?;
        }
        loader
            .execute()
            .await
            .map_err(|e| self.send_failed("execute", e))
    }

    /// Hand the SD card to the board without writing anything.
    pub async fn prepare_boot(&self) -> BootlabResult<()> {
        if let Some(sdmux) = &self.sdmux {
            sdmux.set_mode(MuxMode::Device).await?;
        }
        Ok(())
    }

    fn plan_stage(&self, image_dir: &Path, stage: &WriteStage) -> BootlabResult<PlannedWrite> {
        let (role, source, target) = match *stage {
            WriteStage::Image {
                role,
                source,
                seek,
                block_size,
                count,
            } => (
                role,
                source,
                WriteTarget::Image(ImageTarget {
                    seek,
                    block_size,
                    count,
                }),
            ),
            WriteStage::Files {
                role,
                source,
                dest,
                partition,
                target_is_directory,
            } => (
                role,
                source,
                WriteTarget::Files(FileTarget {
                    dest: PathBuf::from(dest),
                    partition,
                    target_is_directory,
                }),
            ),
            WriteStage::Emulator { role, source } => (role, source, WriteTarget::Emulator),
        };

        Ok(PlannedWrite {
            role,
            source: self.artifact_path(image_dir, source)?,
            target,
        })
    }

    fn artifact_path(&self, image_dir: &Path, artifact: Artifact) -> BootlabResult<PathBuf> {
        match artifact {
            Artifact::Build(file) => Ok(image_dir.join(file)),
            Artifact::Blob(blob) => {
                let path = match blob {
                    Blob::Bl1 => &self.options.bl1,
                    Blob::Bl2 => &self.options.bl2,
                    Blob::Tzsw => &self.options.tzsw,
                };
                path.clone().ok_or_else(|| {
                    BootlabError::Config(format!(
                        "method {} needs the {} blob",
                        self.method.name,
                        blob.as_str()
                    ))
                })
            }
        }
    }

    fn unsupported(&self, operation: &str) -> BootlabError {
        BootlabError::UnsupportedWriteMethod {
            method: self.method.name.to_string(),
            operation: operation.to_string(),
        }
    }

    fn send_failed(&self, stage: &str, e: BootlabError) -> BootlabError {
        BootlabError::SendFailed {
            method: self.method.name.to_string(),
            stage: stage.to_string(),
            reason: e.to_string(),
        }
    }
}

async fn switch_to_host(sdmux: &dyn SdMuxProtocol) -> BootlabResult<()> {
    sdmux.activate().await?;
    sdmux.set_mode(MuxMode::Host).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(method: &str) -> ImageWriter {
        ImageWriter::new(WriterOptions::for_method(method)).unwrap()
    }

    #[test]
    fn test_new_rejects_unknown_method() {
        let err = ImageWriter::new(WriterOptions::for_method("vax")).err().unwrap();
        assert!(matches!(err, BootlabError::UnsupportedWriteMethod { .. }));
    }

    #[test]
    fn test_resolve_sunxi() {
        let spec = writer("sunxi").resolve_write(Path::new("/b/bpi")).unwrap();
        assert_eq!(spec.stages.len(), 1);
        let stage = &spec.stages[0];
        assert_eq!(stage.source, PathBuf::from("/b/bpi/u-boot-sunxi-with-spl.bin"));
        let WriteTarget::Image(target) = stage.target else {
            panic!("expected raw image write");
        };
        assert_eq!(target.byte_offset(), 8 * 1024);
    }

    #[test]
    fn test_resolve_rpi_files() {
        let spec = writer("rpi3").resolve_write(Path::new("/b/rpi_3")).unwrap();
        assert_eq!(
            spec.stages[0].target,
            WriteTarget::Files(FileTarget {
                dest: PathBuf::from("/rpi3-u-boot.bin"),
                partition: 1,
                target_is_directory: false,
            })
        );
        assert_eq!(
            spec.artifacts().get("uboot").copied(),
            Some(Path::new("/b/rpi_3/u-boot.bin"))
        );
    }

    #[test]
    fn test_samsung_needs_blobs() {
        let err = writer("samsung").resolve_write(Path::new("/b/snow")).unwrap_err();
        assert!(matches!(err, BootlabError::Config(ref msg) if msg.contains("bl1")));

        let options = WriterOptions {
            bl1: Some(PathBuf::from("/fw/bl1.bin")),
            bl2: Some(PathBuf::from("/fw/bl2.bin")),
            tzsw: Some(PathBuf::from("/fw/tzsw.bin")),
            ..WriterOptions::for_method("samsung")
        };
        let spec = ImageWriter::new(options)
            .unwrap()
            .resolve_write(Path::new("/b/snow"))
            .unwrap();
        let sources: Vec<_> = spec.stages.iter().map(|s| s.source.clone()).collect();
        assert_eq!(
            sources,
            [
                PathBuf::from("/fw/bl1.bin"),
                PathBuf::from("/fw/bl2.bin"),
                PathBuf::from("/fw/tzsw.bin"),
                PathBuf::from("/b/snow/u-boot.bin"),
            ]
        );
    }

    #[test]
    fn test_tegra_can_only_send() {
        let tegra = writer("tegra");
        assert!(matches!(
            tegra.resolve_write(Path::new("/b/t")).unwrap_err(),
            BootlabError::UnsupportedWriteMethod { ref operation, .. } if operation == "writing"
        ));
        let plan = tegra.resolve_send(Path::new("/b/t")).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].source, Some(PathBuf::from("/b/t/u-boot-dtb-tegra.bin")));
    }

    #[test]
    fn test_samsung_send_uses_builtin_bl1() {
        let plan = writer("samsung").resolve_send(Path::new("/b/s")).unwrap();
        assert_eq!(plan[0].source, None);
        assert_eq!(plan[0].phase, Some("bl1"));
        assert_eq!(plan[1].phase, Some("spl"));
        assert_eq!(plan[2].phase, None);
    }
}
