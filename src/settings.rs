use netgauge::config::MeasurementConfig;

const MIB: u64 = 1024 * 1024;

/// The knobs the settings view can turn between runs. Everything else comes
/// from the loaded config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ping_count: usize,
    pub download_size_mb: u64,
    pub streams: usize,
    pub upload_size_mb: u64,
}

impl Settings {
    pub fn from_config(config: &MeasurementConfig) -> Self {
        Self {
            ping_count: config.latency.samples,
            download_size_mb: (config.download.total_bytes / MIB).max(1),
            streams: config.download.parallel,
            upload_size_mb: (config.upload.total_bytes / MIB).max(1),
        }
    }

    /// `base` with these settings applied.
    pub fn apply(&self, base: &MeasurementConfig) -> MeasurementConfig {
        let mut config = base.clone();
        config.latency.samples = self.ping_count;
        config.download.total_bytes = self.download_size_mb * MIB;
        config.download.parallel = self.streams;
        config.upload.total_bytes = self.upload_size_mb * MIB;
        config
    }

    pub fn increase(&mut self, field: SettingsField) {
        match field {
            SettingsField::PingCount => self.ping_count = (self.ping_count + 2).min(50),
            SettingsField::DownloadSize => {
                self.download_size_mb = (self.download_size_mb + 10).min(500)
            }
            SettingsField::Streams => self.streams = (self.streams + 1).min(16),
            SettingsField::UploadSize => self.upload_size_mb = (self.upload_size_mb + 2).min(100),
        }
    }

    pub fn decrease(&mut self, field: SettingsField) {
        match field {
            SettingsField::PingCount => self.ping_count = self.ping_count.saturating_sub(2).max(2),
            SettingsField::DownloadSize => {
                self.download_size_mb = self.download_size_mb.saturating_sub(10).max(10)
            }
            SettingsField::Streams => self.streams = self.streams.saturating_sub(1).max(1),
            SettingsField::UploadSize => {
                self.upload_size_mb = self.upload_size_mb.saturating_sub(2).max(1)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    PingCount,
    DownloadSize,
    Streams,
    UploadSize,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::PingCount => SettingsField::DownloadSize,
            SettingsField::DownloadSize => SettingsField::Streams,
            SettingsField::Streams => SettingsField::UploadSize,
            SettingsField::UploadSize => SettingsField::PingCount,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::PingCount => SettingsField::UploadSize,
            SettingsField::DownloadSize => SettingsField::PingCount,
            SettingsField::Streams => SettingsField::DownloadSize,
            SettingsField::UploadSize => SettingsField::Streams,
        }
    }
}
