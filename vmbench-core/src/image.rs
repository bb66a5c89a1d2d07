// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-run sandbox image derivation.
//!
//! The cached base filesystem is never modified. Each microVM run copies it,
//! grows the copy, repairs and resizes the filesystem, then loop-mounts it to
//! inject the guest startup script. The mount is always released, including
//! when a step fails or the future is dropped mid-way.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::error::ImageError;
use crate::exec::{CommandRunner, CommandSpec};

/// File name of the derived image inside the run directory.
pub const IMAGE_FILE: &str = "rootfs.ext4";

/// Mount point directory inside the run directory.
pub const MOUNT_DIR: &str = "rootfs_mount";

/// Guest path of the injected init script.
pub const STARTUP_SCRIPT_PATH: &str = "/root/startup.sh";

const MIB: u64 = 1024 * 1024;

/// Highest `e2fsck` exit code meaning "clean or errors corrected".
const FSCK_MAX_OK: i32 = 2;

/// Render the guest init script.
///
/// Mounts the pseudo filesystems, configures `eth0`, starts the workload in
/// the background and then idles so the kernel never sees init exit.
pub fn render_startup_script(network: &NetworkConfig, entrypoint: &str) -> String {
    format!(
        "#!/bin/bash\n\
         # Mount necessary filesystems\n\
         mount -t proc proc /proc\n\
         mount -t sysfs sysfs /sys\n\
         mount -t devtmpfs devtmpfs /dev\n\
         \n\
         # Configure network\n\
         ip addr add {guest} dev eth0\n\
         ip link set eth0 up\n\
         ip route add default via {gateway}\n\
         \n\
         # Start workload\n\
         cd /root\n\
         {entrypoint} &\n\
         \n\
         while true; do sleep 1000; done\n",
        guest = network.guest,
        gateway = network.host.addr(),
        entrypoint = entrypoint.trim(),
    )
}

/// Derives bootable images from the cached base filesystem.
pub struct ImageCustomizer {
    runner: Arc<dyn CommandRunner>,
    headroom_mib: u64,
    /// Used only by the synchronous unmount fallback in [`MountGuard`]'s drop.
    privilege: Option<String>,
}

impl ImageCustomizer {
    pub fn new(runner: Arc<dyn CommandRunner>, headroom_mib: u64, privilege: Option<String>) -> Self {
        Self {
            runner,
            headroom_mib,
            privilege,
        }
    }

    /// Build `run_dir/rootfs.ext4` from `base_image` with `script` installed
    /// as the guest init.
    pub async fn derive(
        &self,
        base_image: &Path,
        run_dir: &Path,
        script: &str,
    ) -> Result<PathBuf, ImageError> {
        let image = run_dir.join(IMAGE_FILE);

        tokio::fs::copy(base_image, &image)
            .await
            .map_err(|e| ImageError::Copy {
                from: base_image.to_path_buf(),
                to: image.clone(),
                source: e,
            })?;

        self.grow(&image).await?;
        self.check_filesystem(&image).await?;

        self.runner
            .run_checked(&CommandSpec::new("resize2fs").arg(path_arg(&image)))
            .await
            .map_err(|e| ImageError::Step {
                step: "resize2fs",
                source: e,
            })?;

        let mount_point = run_dir.join(MOUNT_DIR);
        tokio::fs::create_dir_all(&mount_point)
            .await
            .map_err(|e| ImageError::MountPoint {
                path: mount_point.clone(),
                source: e,
            })?;

        let guard = MountGuard::mount(
            self.runner.clone(),
            &image,
            &mount_point,
            self.privilege.clone(),
        )
        .await?;

        let injected = self.inject_script(guard.path(), script).await;
        guard.unmount().await;
        injected?;

        tracing::info!(
            image = %image.display(),
            headroom_mib = self.headroom_mib,
            "Derived sandbox image"
        );
        Ok(image)
    }

    async fn grow(&self, image: &Path) -> Result<(), ImageError> {
        let grow_err = |e| ImageError::Grow {
            path: image.to_path_buf(),
            source: e,
        };

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(image)
            .await
            .map_err(grow_err)?;
        let len = file.metadata().await.map_err(grow_err)?.len();
        file.set_len(len + self.headroom_mib * MIB)
            .await
            .map_err(grow_err)?;
        Ok(())
    }

    async fn check_filesystem(&self, image: &Path) -> Result<(), ImageError> {
        let output = self
            .runner
            .run(&CommandSpec::new("e2fsck").args(["-f", "-y"]).arg(path_arg(image)))
            .await
            .map_err(|e| ImageError::Step {
                step: "e2fsck",
                source: e,
            })?;

        match output.code {
            Some(code) if (0..=FSCK_MAX_OK).contains(&code) => {
                if code != 0 {
                    tracing::debug!(code = code, "Filesystem errors corrected");
                }
                Ok(())
            }
            code => Err(ImageError::FsckFailed { code }),
        }
    }

    async fn inject_script(&self, mount_point: &Path, script: &str) -> Result<(), ImageError> {
        let target = mount_point.join(STARTUP_SCRIPT_PATH.trim_start_matches('/'));
        let target = path_arg(&target);

        self.runner
            .run_checked(
                &CommandSpec::new("tee")
                    .arg(target.clone())
                    .stdin(script.as_bytes())
                    .privileged(),
            )
            .await
            .map_err(|e| ImageError::Step {
                step: "write startup script",
                source: e,
            })?;

        self.runner
            .run_checked(&CommandSpec::new("chmod").args(["+x", target.as_str()]).privileged())
            .await
            .map_err(|e| ImageError::Step {
                step: "chmod startup script",
                source: e,
            })?;

        Ok(())
    }
}

/// Scoped loop mount.
///
/// [`MountGuard::unmount`] is the normal release path. If the guard is
/// dropped while still mounted, `umount` runs synchronously.
pub struct MountGuard {
    runner: Arc<dyn CommandRunner>,
    mount_point: PathBuf,
    privilege: Option<String>,
    mounted: bool,
}

impl MountGuard {
    pub async fn mount(
        runner: Arc<dyn CommandRunner>,
        image: &Path,
        mount_point: &Path,
        privilege: Option<String>,
    ) -> Result<Self, ImageError> {
        runner
            .run_checked(
                &CommandSpec::new("mount")
                    .args(["-o", "loop"])
                    .arg(path_arg(image))
                    .arg(path_arg(mount_point))
                    .privileged(),
            )
            .await
            .map_err(|e| ImageError::Step {
                step: "mount",
                source: e,
            })?;

        tracing::debug!(mount_point = %mount_point.display(), "Image mounted");

        Ok(Self {
            runner,
            mount_point: mount_point.to_path_buf(),
            privilege,
            mounted: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.mount_point
    }

    /// Unmount; failures are logged, never returned.
    pub async fn unmount(mut self) {
        let spec = CommandSpec::new("umount")
            .arg(path_arg(&self.mount_point))
            .privileged();

        if let Err(e) = self.runner.run_checked(&spec).await {
            tracing::warn!(
                mount_point = %self.mount_point.display(),
                error = %e,
                "Failed to unmount image"
            );
        }
        self.mounted = false;
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }

        let mut cmd = match &self.privilege {
            Some(prefix) => {
                let mut cmd = std::process::Command::new(prefix);
                cmd.arg("umount");
                cmd
            }
            None => std::process::Command::new("umount"),
        };

        match cmd.arg(&self.mount_point).status() {
            Ok(status) if status.success() => {
                tracing::debug!(mount_point = %self.mount_point.display(), "Image unmounted on drop")
            }
            Ok(status) => tracing::warn!(
                mount_point = %self.mount_point.display(),
                status = %status,
                "Unmount on drop failed"
            ),
            Err(e) => tracing::warn!(
                mount_point = %self.mount_point.display(),
                error = %e,
                "Unmount on drop failed"
            ),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::testing::{failed, ok, FakeRunner};
    use tempfile::TempDir;

    const BASE_SIZE: u64 = 4096;

    fn base_image(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("base_rootfs.ext4");
        std::fs::write(&path, vec![0u8; BASE_SIZE as usize]).unwrap();
        path
    }

    fn run_dir(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("run");
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_startup_script_contents() {
        let network = ConfigLoader::defaults().unwrap().network;
        let script = render_startup_script(&network, "python3 -m http.server 8080");

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("mount -t proc proc /proc"));
        assert!(script.contains("ip addr add 172.16.0.2/24 dev eth0"));
        assert!(script.contains("ip route add default via 172.16.0.1\n"));
        assert!(script.contains("cd /root\npython3 -m http.server 8080 &\n"));
        assert!(script.trim_end().ends_with("while true; do sleep 1000; done"));
    }

    #[tokio::test]
    async fn test_derive_runs_pipeline_in_order() {
        let dir = TempDir::new().unwrap();
        let base = base_image(&dir);
        let run = run_dir(&dir);
        let runner = Arc::new(FakeRunner::succeeding());
        let customizer = ImageCustomizer::new(runner.clone(), 1, Some("sudo".into()));

        let image = customizer.derive(&base, &run, "#!/bin/bash\n").await.unwrap();

        assert_eq!(image, run.join(IMAGE_FILE));
        assert_eq!(std::fs::metadata(&image).unwrap().len(), BASE_SIZE + MIB);
        // Base image untouched.
        assert_eq!(std::fs::metadata(&base).unwrap().len(), BASE_SIZE);
        assert!(run.join(MOUNT_DIR).is_dir());

        let programs: Vec<String> = runner.calls().into_iter().map(|c| c.program).collect();
        assert_eq!(
            programs,
            ["e2fsck", "resize2fs", "mount", "tee", "chmod", "umount"]
        );

        let tee = runner.calls().into_iter().find(|c| c.program == "tee").unwrap();
        assert_eq!(tee.stdin.as_deref(), Some(b"#!/bin/bash\n".as_slice()));
        assert!(tee.args[0].ends_with("rootfs_mount/root/startup.sh"));
    }

    #[tokio::test]
    async fn test_unmounts_when_script_write_fails() {
        let dir = TempDir::new().unwrap();
        let base = base_image(&dir);
        let run = run_dir(&dir);
        let runner = Arc::new(FakeRunner::with_handler(|spec| {
            if spec.program == "tee" {
                Ok(failed(1, "No space left on device"))
            } else {
                Ok(ok(""))
            }
        }));
        let customizer = ImageCustomizer::new(runner.clone(), 1, None);

        let err = customizer.derive(&base, &run, "script").await.unwrap_err();

        assert!(matches!(
            err,
            ImageError::Step {
                step: "write startup script",
                ..
            }
        ));
        assert_eq!(runner.count("umount", &[]), 1);
        assert_eq!(runner.count("chmod", &[]), 0);
    }

    #[tokio::test]
    async fn test_fsck_exit_codes() {
        for (code, accepted) in [(0, true), (1, true), (2, true), (4, false), (8, false)] {
            let dir = TempDir::new().unwrap();
            let base = base_image(&dir);
            let run = run_dir(&dir);
            let runner = Arc::new(FakeRunner::with_handler(move |spec| {
                if spec.program == "e2fsck" {
                    Ok(failed(code, ""))
                } else {
                    Ok(ok(""))
                }
            }));
            let customizer = ImageCustomizer::new(runner.clone(), 1, None);

            let result = customizer.derive(&base, &run, "script").await;

            assert_eq!(result.is_ok(), accepted, "e2fsck exit code {}", code);
            if !accepted {
                assert!(matches!(result, Err(ImageError::FsckFailed { code: Some(c) }) if c == code));
                assert_eq!(runner.count("mount", &[]), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_missing_base_image() {
        let dir = TempDir::new().unwrap();
        let run = run_dir(&dir);
        let runner = Arc::new(FakeRunner::succeeding());
        let customizer = ImageCustomizer::new(runner.clone(), 1, None);

        let err = customizer
            .derive(&dir.path().join("missing.ext4"), &run, "script")
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::Copy { .. }));
        assert!(runner.calls().is_empty());
    }
}
