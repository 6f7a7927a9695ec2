use color_eyre::eyre::bail;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    pub fn new() -> color_eyre::Result<Self> {
        if let Ok(path) = std::env::var("APPCTL_DATA_DIR") {
            return Ok(Self {
                data_dir: PathBuf::from(path),
            });
        }
        let Some(base) = dirs::data_dir() else {
            bail!("could not determine data directory");
        };
        Ok(Self {
            data_dir: base.join("appctl"),
        })
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { data_dir: base }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("appctl.pid")
    }

    pub fn socket_file(&self) -> PathBuf {
        self.data_dir.join("appctl.sock")
    }

    pub fn port_file(&self) -> PathBuf {
        self.data_dir.join("appctl.port")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("appctl.toml")
    }
}
