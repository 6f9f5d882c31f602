//! Vessel position from NMEA 0183 RMC sentences.

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::navdata::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub position: Position,
    pub ts: OffsetDateTime,
}

pub enum NmeaSource {
    Serial(BufReader<SerialStream>),
    /// Replays a capture; the file is polled for new lines at EOF.
    File(BufReader<File>),
}

impl NmeaSource {
    pub fn serial(dev: &str, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(dev, baud).open_native_async()
            .with_context(|| format!("open serial {}", dev))?;
        Ok(Self::Serial(BufReader::new(port)))
    }

    pub async fn file(path: &str) -> Result<Self> {
        let f = File::open(path).await.with_context(|| format!("open nmea file {}", path))?;
        Ok(Self::File(BufReader::new(f)))
    }

    pub async fn next_fix(&mut self) -> Result<Fix> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = match self {
                NmeaSource::Serial(r) => r.read_line(&mut line).await?,
                NmeaSource::File(r) => r.read_line(&mut line).await?,
            };
            if n == 0 {
                if let NmeaSource::Serial(_) = self {
                    anyhow::bail!("nmea serial stream closed");
                }
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                continue;
            }
            if let Some(position) = parse_rmc(line.trim()) {
                return Ok(Fix { position, ts: OffsetDateTime::now_utc() });
            }
        }
    }
}

/// Position from a valid (`A` status) RMC sentence, any talker id.
pub fn parse_rmc(s: &str) -> Option<Position> {
    let body = s.strip_prefix('$')?;
    let body = body.split('*').next()?;
    let parts: Vec<&str> = body.split(',').collect();
    if parts.len() < 7 || !parts[0].ends_with("RMC") || parts[2] != "A" {
        return None;
    }
    // parts[3]=lat ddmm.mmmm, parts[4]=N/S, parts[5]=lon dddmm.mmmm, parts[6]=E/W
    let lat = parse_deg_min(parts[3], parts[4], 2)?;
    let lon = parse_deg_min(parts[5], parts[6], 3)?;
    let p = Position::new(lat, lon);
    p.validate().ok()?;
    Some(p)
}

fn parse_deg_min(v: &str, hemi: &str, deg_len: usize) -> Option<f64> {
    if v.len() <= deg_len {
        return None;
    }
    // line noise may put multibyte chars here; never split one
    let deg: f64 = v.get(..deg_len)?.parse().ok()?;
    let min: f64 = v.get(deg_len..)?.parse().ok()?;
    let out = deg + min / 60.0;
    match hemi {
        "N" | "E" => Some(out),
        "S" | "W" => Some(-out),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rmc_position() {
        let p = parse_rmc("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A").unwrap();
        assert!((p.latitude - 48.1173).abs() < 1e-4);
        assert!((p.longitude - 11.516_666).abs() < 1e-4);
    }

    #[test]
    fn garbled_coordinates_are_rejected_not_fatal() {
        assert!(parse_rmc("$GPRMC,1,A,4é07.038,N,01131.000,E,0,0,230394,,*00").is_none());
        assert!(parse_rmc("$GPRMC,1,A,4807.038,N,0é131.000,E,0,0,230394,,*00").is_none());
        assert!(parse_rmc("$GPRMC,1,A,48°7.038,N,01131.000,E,0,0,230394,,*00").is_none());
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let p = parse_rmc("$GNRMC,000000,A,4130.000,S,17415.000,W,0,0,010124,,,A*00").unwrap();
        assert!((p.latitude + 41.5).abs() < 1e-9);
        assert!((p.longitude + 174.25).abs() < 1e-9);
    }

    #[test]
    fn void_or_foreign_sentences_are_skipped() {
        assert!(parse_rmc("$GPRMC,123519,V,4807.038,N,01131.000,E,,,230394,,*00").is_none());
        assert!(parse_rmc("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47").is_none());
        assert!(parse_rmc("garbage").is_none());
    }
}
