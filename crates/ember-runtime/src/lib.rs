//! Bootstrap glue for the ember kernel.
//!
//! A [`Runtime`] owns a fully wired kernel over a disk image and offers the
//! host-facing conveniences the CLI builds on: moving files between the
//! host and the simulated file system, and running user programs to
//! completion. Everything here must run on the thread that constructed the
//! runtime, which the kernel adopted as its main thread.

pub mod image;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;

use ember_kernel::{Kernel, KernelConfig};

pub use ember_kernel::{FsError, KernelConfig as Config, ReplacementPolicy};
pub use image::ImageBuilder;

pub struct RuntimeOptions {
    pub config: KernelConfig,
    pub disk_image: PathBuf,
    /// Initialize the disk instead of mounting what is there.
    pub format: bool,
    pub console_source: Box<dyn Read + Send>,
    pub console_sink: Box<dyn Write + Send>,
}

impl RuntimeOptions {
    pub fn new(disk_image: impl Into<PathBuf>) -> Self {
        Self {
            config: KernelConfig::default(),
            disk_image: disk_image.into(),
            format: false,
            console_source: Box::new(std::io::stdin()),
            console_sink: Box::new(std::io::stdout()),
        }
    }
}

pub struct Runtime {
    pub kernel: Arc<Kernel>,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        let kernel = Kernel::new(
            options.config,
            &options.disk_image,
            options.console_source,
            options.console_sink,
            options.format,
        )
        .with_context(|| format!("bringing up the kernel over {:?}", options.disk_image))?;
        Ok(Self { kernel })
    }

    /// Copy a host file into the simulated file system.
    pub fn copy_in(&self, host_path: &Path, fs_path: &str) -> Result<()> {
        let bytes = std::fs::read(host_path)
            .with_context(|| format!("reading host file {host_path:?}"))?;
        let fs = &self.kernel.file_system;

        fs.create_file(fs_path, bytes.len())
            .with_context(|| format!("creating {fs_path}"))?;
        let file = fs.open(fs_path).context("opening the new file")?;
        let written = file.write_at(&bytes, 0);
        fs.close(&file);
        if written != bytes.len() {
            bail!("short write copying into {fs_path}");
        }
        info!("copied {host_path:?} -> {fs_path} ({} bytes)", bytes.len());
        Ok(())
    }

    /// Read a whole file out of the simulated file system.
    pub fn read_file(&self, fs_path: &str) -> Result<Vec<u8>> {
        let fs = &self.kernel.file_system;
        let file = fs.open(fs_path).with_context(|| format!("opening {fs_path}"))?;
        let mut bytes = vec![0u8; file.length()];
        let read = file.read_at(&mut bytes, 0);
        fs.close(&file);
        if read != bytes.len() {
            bail!("short read from {fs_path}");
        }
        Ok(bytes)
    }

    /// Write `bytes` into the simulated file system as `fs_path`.
    pub fn write_file(&self, fs_path: &str, bytes: &[u8]) -> Result<()> {
        let fs = &self.kernel.file_system;
        fs.create_file(fs_path, bytes.len())
            .with_context(|| format!("creating {fs_path}"))?;
        let file = fs.open(fs_path).context("opening the new file")?;
        let written = file.write_at(bytes, 0);
        fs.close(&file);
        if written != bytes.len() {
            bail!("short write into {fs_path}");
        }
        Ok(())
    }

    /// Execute the program stored at `fs_path` and wait for its exit
    /// status.
    pub fn run_program(&self, fs_path: &str, args: &[String]) -> Result<i32> {
        self.kernel
            .run_program(fs_path, args)
            .with_context(|| format!("executing {fs_path}"))
    }
}
