use anyhow::Result;

use crate::notifier::MIN_PERIOD;
use crate::reconciler::{ReconcilerConfig, MIN_REBROADCAST};

pub fn check_course(cfg: &ReconcilerConfig) -> Result<()> {
    anyhow::ensure!(!cfg.origin.trim().is_empty(), "course.origin must not be empty");
    anyhow::ensure!(!cfg.record_key.is_empty(), "course.record_key must not be empty");
    anyhow::ensure!(
        cfg.rebroadcast_interval >= MIN_REBROADCAST,
        "course.rebroadcast_secs must be >= {}",
        MIN_REBROADCAST.as_secs()
    );
    anyhow::ensure!(cfg.notify_period >= MIN_PERIOD, "course.notify_period_ms must be >= {}", MIN_PERIOD.as_millis());
    anyhow::ensure!(cfg.sample_size >= 1, "course.sample_size must be >= 1");
    Ok(())
}

pub fn check_gnss(source: &str, device: Option<&str>, file: Option<&str>) -> Result<()> {
    match source {
        "none" => Ok(()),
        "nmea-serial" => {
            anyhow::ensure!(device.map_or(false, |d| !d.is_empty()), "gnss.nmea_device missing");
            Ok(())
        }
        "nmea-file" => {
            let f = file.filter(|f| !f.is_empty()).ok_or_else(|| anyhow::anyhow!("gnss.nmea_file missing"))?;
            anyhow::ensure!(std::path::Path::new(f).is_file(), "gnss.nmea_file {} not found", f);
            Ok(())
        }
        other => anyhow::bail!("unknown gnss.source: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_pass() {
        check_course(&ReconcilerConfig::default()).unwrap();
    }

    #[test]
    fn short_notify_period_fails() {
        let cfg = ReconcilerConfig { notify_period: Duration::from_millis(100), ..Default::default() };
        assert!(check_course(&cfg).is_err());
    }

    #[test]
    fn zero_rebroadcast_fails() {
        let cfg = ReconcilerConfig { rebroadcast_interval: Duration::ZERO, ..Default::default() };
        assert!(check_course(&cfg).is_err());
    }

    #[test]
    fn gnss_sources() {
        check_gnss("none", None, None).unwrap();
        assert!(check_gnss("nmea-serial", None, None).is_err());
        check_gnss("nmea-serial", Some("/dev/ttyUSB0"), None).unwrap();
        assert!(check_gnss("nmea-file", None, Some("/definitely/not/here.nmea")).is_err());
        assert!(check_gnss("carrier-pigeon", None, None).is_err());
    }
}
