//! In-memory and file-backed sample sources and profile stores

use chrono::DateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{MetabolicsError, Result};
use crate::session::{ProfileStore, SampleSource};
use crate::types::{Page, Sample, SubjectProfile};

/// Serves sessions held in memory, `page_size` samples per page. The page
/// token is the offset of the next sample.
#[derive(Clone, Debug)]
pub struct MemorySource {
    page_size: usize,
    sessions: HashMap<String, Vec<Sample>>,
}

impl MemorySource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            sessions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, session_id: &str, samples: Vec<Sample>) {
        self.sessions.insert(session_id.to_string(), samples);
    }
}

impl SampleSource for MemorySource {
    fn fetch_page(&mut self, session_id: &str, token: Option<&str>) -> Result<Page> {
        let samples = self
            .sessions
            .get(session_id)
            .ok_or_else(|| MetabolicsError::Source(format!("unknown session {}", session_id)))?;
        let offset = match token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| MetabolicsError::Source(format!("bad page token {:?}", t)))?,
            None => 0,
        };
        let start = offset.min(samples.len());
        let end = (start + self.page_size).min(samples.len());
        Ok(Page {
            samples: samples[start..end].to_vec(),
            next_token: (end < samples.len()).then(|| end.to_string()),
        })
    }
}

/// Profiles keyed by case-insensitive subject id (an email address upstream).
#[derive(Clone, Debug, Default)]
pub struct MemoryProfileStore {
    profiles: HashMap<String, SubjectProfile>,
}

impl MemoryProfileStore {
    pub fn insert(&mut self, subject_id: &str, profile: SubjectProfile) {
        self.profiles.insert(subject_id.to_lowercase(), profile);
    }

    /// JSON object mapping subject id to profile.
    pub fn load(path: &Path) -> Result<Self> {
        let profiles: HashMap<String, SubjectProfile> = read_json(path)?;
        let mut store = Self::default();
        for (id, profile) in profiles {
            profile.validate()?;
            store.insert(&id, profile);
        }
        Ok(store)
    }
}

impl ProfileStore for MemoryProfileStore {
    fn lookup(&self, subject_id: &str) -> Result<Option<SubjectProfile>> {
        Ok(self.profiles.get(&subject_id.to_lowercase()).cloned())
    }
}

pub fn load_profile(path: &Path) -> Result<SubjectProfile> {
    let profile: SubjectProfile = read_json(path)?;
    profile.validate()?;
    Ok(profile)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Seconds(f64),
    Text(String),
}

impl Timestamp {
    fn seconds(&self) -> Result<f64> {
        match self {
            Timestamp::Seconds(s) => Ok(*s),
            Timestamp::Text(text) => parse_timestamp(text),
        }
    }
}

/// One row of a recording, as exported by the phone app.
#[derive(Deserialize)]
struct RecordRow {
    timestamp: Timestamp,
    gyro_x: f64,
    gyro_y: f64,
    gyro_z: f64,
    acc_x: f64,
    acc_y: f64,
    acc_z: f64,
}

impl RecordRow {
    fn into_sample(self) -> Result<Sample> {
        Ok(Sample::new(
            self.timestamp.seconds()?,
            [self.gyro_x, self.gyro_y, self.gyro_z],
            [self.acc_x, self.acc_y, self.acc_z],
        ))
    }
}

/// Seconds since the epoch, or an RFC 3339 date-time.
pub fn parse_timestamp(text: &str) -> Result<f64> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<f64>() {
        return Ok(seconds);
    }
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|e| MetabolicsError::Source(format!("bad timestamp {:?}: {}", text, e)))?;
    Ok(parsed.timestamp_micros() as f64 / 1e6)
}

/// Load a recording from `.json` or `.csv`, either optionally gzipped.
///
/// Samples are returned in timestamp order.
pub fn load_recording(path: &Path) -> Result<Vec<Sample>> {
    let reader = open_maybe_gz(path)?;
    let name = path.to_string_lossy().to_lowercase();
    let inner = name.strip_suffix(".gz").unwrap_or(&name);

    let mut samples = if inner.ends_with(".csv") {
        parse_csv(reader)?
    } else {
        let rows: Vec<RecordRow> = serde_json::from_reader(reader)
            .map_err(|e| MetabolicsError::Source(format!("{}: {}", path.display(), e)))?;
        rows.into_iter()
            .map(RecordRow::into_sample)
            .collect::<Result<Vec<_>>>()?
    };

    if samples.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
        warn!("{}: timestamps out of order, sorting", path.display());
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }
    info!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

fn parse_csv(reader: impl Read) -> Result<Vec<Sample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers: StringRecord = reader
        .headers()
        .map_err(|e| MetabolicsError::Source(format!("CSV header: {}", e)))?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();
    reader.set_headers(headers);

    reader
        .deserialize::<RecordRow>()
        .enumerate()
        .map(|(row, record)| {
            record
                .map_err(|e| MetabolicsError::Source(format!("CSV row {}: {}", row + 1, e)))?
                .into_sample()
        })
        .collect()
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)
        .map_err(|e| MetabolicsError::Source(format!("{}: {}", path.display(), e)))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| MetabolicsError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| MetabolicsError::InvalidConfig(format!("{}: {}", path.display(), e)))
}
