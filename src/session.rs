//! Session driver
//!
//! `process_session` pulls pages from a source, cuts them into windows and
//! runs every window through the estimator, strictly in order. The returned
//! `SessionRun` is lazy: nothing is fetched until it is polled, and one window
//! is fully processed before the next page is requested.

use log::{debug, error, info};
use serde::Serialize;
use std::collections::VecDeque;

use crate::basal::basal_rate;
use crate::config::PipelineConfig;
use crate::error::{MetabolicsError, Result};
use crate::estimator::{EnergyEstimator, WindowReport};
use crate::models::ModelSet;
use crate::types::{Outcome, Page, SubjectProfile, Window};
use crate::window_stream::WindowStream;

/// Paginated sample storage. A page without `next_token` ends the session.
pub trait SampleSource {
    fn fetch_page(&mut self, session_id: &str, token: Option<&str>) -> Result<Page>;
}

impl<T: SampleSource + ?Sized> SampleSource for &mut T {
    fn fetch_page(&mut self, session_id: &str, token: Option<&str>) -> Result<Page> {
        (**self).fetch_page(session_id, token)
    }
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn fetch_page(&mut self, session_id: &str, token: Option<&str>) -> Result<Page> {
        (**self).fetch_page(session_id, token)
    }
}

pub trait ProfileStore {
    fn lookup(&self, subject_id: &str) -> Result<Option<SubjectProfile>>;
}

/// Everything a session reads but never changes.
#[derive(Clone)]
pub struct SessionContext {
    profile: SubjectProfile,
    basal_watts: f64,
    config: PipelineConfig,
    models: ModelSet,
}

impl SessionContext {
    pub fn new(profile: SubjectProfile, config: PipelineConfig, models: ModelSet) -> Result<Self> {
        profile.validate()?;
        config.validate()?;
        let basal_watts = basal_rate(&profile, &config);
        Ok(Self {
            profile,
            basal_watts,
            config,
            models,
        })
    }

    pub fn for_subject(
        store: &dyn ProfileStore,
        subject_id: &str,
        config: PipelineConfig,
        models: ModelSet,
    ) -> Result<Self> {
        let profile = store
            .lookup(subject_id)?
            .ok_or_else(|| MetabolicsError::ProfileNotFound(subject_id.to_string()))?;
        Self::new(profile, config, models)
    }

    pub fn profile(&self) -> &SubjectProfile {
        &self.profile
    }

    pub fn basal_watts(&self) -> f64 {
        self.basal_watts
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub pages: usize,
    pub windows: usize,
    pub estimates: usize,
    pub fallbacks: usize,
    pub flagged: usize,
    /// Windows that produced no model estimate
    pub fallback_windows: usize,
    pub discarded_samples: usize,
}

impl SessionStats {
    fn record(&mut self, report: &WindowReport) {
        self.windows += 1;
        if report.is_fallback() {
            self.fallback_windows += 1;
        }
        for outcome in &report.outcomes {
            match outcome {
                Outcome::Ok(_) => self.estimates += 1,
                Outcome::Fallback(_) => self.fallbacks += 1,
                Outcome::Flagged(_) => self.flagged += 1,
            }
        }
    }
}

pub fn process_session<'a, S: SampleSource>(
    ctx: &SessionContext,
    session_id: &str,
    source: S,
) -> SessionRun<'a, S> {
    let (estimator, failure) = match EnergyEstimator::new(ctx) {
        Ok(estimator) => (Some(estimator), None),
        Err(e) => (None, Some(e)),
    };
    SessionRun {
        session_id: session_id.to_string(),
        source,
        estimator,
        failure,
        stream: WindowStream::from_config(ctx.config()),
        token: None,
        started: false,
        source_done: false,
        stream_done: false,
        finished: false,
        windows: VecDeque::new(),
        outcomes: VecDeque::new(),
        stats: SessionStats::default(),
        progress: 0.0,
        observer: None,
    }
}

/// Lazy run over one session. Yields outcomes; the first `Err` ends it.
pub struct SessionRun<'a, S> {
    session_id: String,
    source: S,
    estimator: Option<EnergyEstimator>,
    failure: Option<MetabolicsError>,
    stream: WindowStream,
    token: Option<String>,
    started: bool,
    source_done: bool,
    stream_done: bool,
    finished: bool,
    windows: VecDeque<Window>,
    outcomes: VecDeque<Outcome>,
    stats: SessionStats,
    progress: f64,
    observer: Option<Box<dyn FnMut(f64) + 'a>>,
}

impl<'a, S: SampleSource> SessionRun<'a, S> {
    /// Called with the fraction of buffered samples already windowed; never decreases.
    pub fn on_progress(mut self, observer: impl FnMut(f64) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Process the next window. `None` once the session is complete or has failed.
    pub fn next_report(&mut self) -> Option<Result<WindowReport>> {
        if self.finished {
            return None;
        }
        if !self.started {
            self.started = true;
            if let Some(e) = self.failure.take() {
                return Some(Err(self.fail(e)));
            }
            info!("Session {}: started", self.session_id);
        }

        loop {
            if let Some(window) = self.windows.pop_front() {
                let estimator = self.estimator.as_ref()?;
                return match estimator.estimate_window(&window) {
                    Ok(report) => {
                        self.stats.record(&report);
                        Some(Ok(report))
                    }
                    Err(e) => Some(Err(self.fail(e))),
                };
            }

            if self.stream_done {
                self.finished = true;
                self.report_progress(1.0);
                info!(
                    "Session {}: finished, {} windows, {} estimates, {} fallbacks, {} flagged",
                    self.session_id,
                    self.stats.windows,
                    self.stats.estimates,
                    self.stats.fallbacks,
                    self.stats.flagged
                );
                return None;
            }

            if self.source_done {
                let finish = self.stream.finish();
                self.stats.discarded_samples = finish.discarded;
                self.windows.extend(finish.windows);
                self.stream_done = true;
                continue;
            }

            let page = match self
                .source
                .fetch_page(&self.session_id, self.token.as_deref())
            {
                Ok(page) => page,
                Err(e) => return Some(Err(self.fail(e))),
            };
            self.stats.pages += 1;
            let end_of_data = page.is_last();
            debug!(
                "Session {}: page {} with {} samples{}",
                self.session_id,
                self.stats.pages,
                page.samples.len(),
                if end_of_data { " (last)" } else { "" }
            );
            self.token = page.next_token;
            self.source_done = end_of_data;

            let flush = self.stream.push(page.samples, end_of_data);
            self.windows.extend(flush.windows);
            self.report_progress(flush.progress);
        }
    }

    fn report_progress(&mut self, progress: f64) {
        if progress > self.progress {
            self.progress = progress;
            if let Some(observer) = self.observer.as_mut() {
                observer(progress);
            }
        }
    }

    fn fail(&mut self, error: MetabolicsError) -> MetabolicsError {
        self.finished = true;
        error!("Session {}: abandoned, {}", self.session_id, error);
        error
    }
}

impl<'a, S: SampleSource> Iterator for SessionRun<'a, S> {
    type Item = Result<Outcome>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(outcome) = self.outcomes.pop_front() {
                return Some(Ok(outcome));
            }
            match self.next_report()? {
                Ok(report) => self.outcomes.extend(report.outcomes),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
