//! Fixed-size windows over a paginated sample stream
//!
//! Pages arrive with arbitrary lengths. Samples accumulate until a chunk
//! target is reached (or the data ends), then the leftover from the previous
//! flush and the new samples are cut into full windows. Whatever is short of
//! a window is carried to the next flush, so no sample is lost or repeated at
//! a page boundary.

use log::debug;

use crate::config::PipelineConfig;
use crate::types::{Sample, Window};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Accumulating,
    Flushing,
    Done,
}

/// Windows cut by one `push`, possibly none.
#[derive(Clone, Debug, Default)]
pub struct Flush {
    pub windows: Vec<Window>,
    pub progress: f64,
}

#[derive(Clone, Debug, Default)]
pub struct Finish {
    pub windows: Vec<Window>,
    /// Trailing samples short of one window, dropped
    pub discarded: usize,
}

#[derive(Debug)]
pub struct WindowStream {
    window_size: usize,
    chunk_target: usize,
    leftover: Vec<Sample>,
    pending: Vec<Sample>,
    next_index: u64,
    folded: usize,
    progress: f64,
    state: StreamState,
}

impl WindowStream {
    pub fn new(window_size: usize, chunk_target: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            chunk_target: chunk_target.max(window_size),
            leftover: Vec::with_capacity(window_size),
            pending: Vec::new(),
            next_index: 0,
            folded: 0,
            progress: 0.0,
            state: StreamState::Accumulating,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.window_size, config.chunk_target())
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Samples waiting for the next flush, leftover included.
    pub fn buffered(&self) -> usize {
        self.leftover.len() + self.pending.len()
    }

    /// Samples already handed out in windows.
    pub fn folded(&self) -> usize {
        self.folded
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Add one page; flushes once the chunk target is reached or the data ends.
    pub fn push(&mut self, samples: Vec<Sample>, end_of_data: bool) -> Flush {
        if self.state == StreamState::Done {
            debug!("Ignoring {} samples pushed after finish", samples.len());
            return Flush {
                windows: Vec::new(),
                progress: self.progress,
            };
        }

        self.pending.extend(samples);
        let windows = if end_of_data || self.pending.len() >= self.chunk_target {
            self.flush()
        } else {
            Vec::new()
        };
        Flush {
            windows,
            progress: self.progress,
        }
    }

    /// Flush what is pending, drop the sub-window remainder and stop.
    pub fn finish(&mut self) -> Finish {
        if self.state == StreamState::Done {
            return Finish::default();
        }
        let windows = self.flush();
        let discarded = self.leftover.len();
        self.leftover.clear();
        self.state = StreamState::Done;
        self.progress = 1.0;
        if discarded > 0 {
            debug!("Discarded {} trailing samples short of a window", discarded);
        }
        Finish { windows, discarded }
    }

    fn flush(&mut self) -> Vec<Window> {
        self.state = StreamState::Flushing;

        let mut buffer = std::mem::take(&mut self.leftover);
        buffer.append(&mut self.pending);
        let full = buffer.len() / self.window_size * self.window_size;
        self.leftover = buffer.split_off(full);

        let windows: Vec<Window> = buffer
            .chunks_exact(self.window_size)
            .map(|chunk| {
                let window = Window {
                    index: self.next_index,
                    samples: chunk.to_vec(),
                };
                self.next_index += 1;
                window
            })
            .collect();

        self.folded += full;
        let seen = self.folded + self.leftover.len();
        if seen > 0 {
            self.progress = self.progress.max(self.folded as f64 / seen as f64);
        }
        self.state = StreamState::Accumulating;
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(i as f64, [0.0; 3], [0.0, 9.81, 0.0]))
            .collect()
    }

    #[test]
    fn test_partition_for_every_page_size() {
        let input = samples(1050);
        let window_size = 100;
        for page_size in 1..=input.len() {
            let mut stream = WindowStream::new(window_size, 2 * window_size);
            let mut windows = Vec::new();
            let mut last_progress = 0.0;

            let pages: Vec<&[Sample]> = input.chunks(page_size).collect();
            for (i, page) in pages.iter().enumerate() {
                let flush = stream.push(page.to_vec(), i + 1 == pages.len());
                assert!(flush.progress >= last_progress);
                last_progress = flush.progress;
                windows.extend(flush.windows);
            }
            let finish = stream.finish();
            windows.extend(finish.windows);

            assert_eq!(finish.discarded, 50, "page size {}", page_size);
            assert_eq!(windows.len(), 10);
            for (i, w) in windows.iter().enumerate() {
                assert_eq!(w.index, i as u64);
                assert_eq!(w.len(), window_size);
            }
            let joined: Vec<Sample> = windows.into_iter().flat_map(|w| w.samples).collect();
            assert_eq!(joined[..], input[..1000], "page size {}", page_size);
            assert_eq!(stream.progress(), 1.0);
            assert_eq!(stream.state(), StreamState::Done);
        }
    }

    #[test]
    fn test_accumulates_until_chunk_target() {
        let mut stream = WindowStream::new(100, 300);
        let flush = stream.push(samples(250), false);
        assert!(flush.windows.is_empty());
        assert_eq!(stream.buffered(), 250);

        let flush = stream.push(samples(80), false);
        assert_eq!(flush.windows.len(), 3);
        assert_eq!(stream.buffered(), 30);
        assert_eq!(stream.folded(), 300);
        assert!((flush.progress - 300.0 / 330.0).abs() < 1e-12);
    }

    #[test]
    fn test_end_of_data_flushes_early() {
        let mut stream = WindowStream::new(100, 1000);
        let flush = stream.push(samples(230), true);
        assert_eq!(flush.windows.len(), 2);
        assert_eq!(stream.finish().discarded, 30);
    }

    #[test]
    fn test_finish_flushes_pending_without_end_marker() {
        let mut stream = WindowStream::new(100, 1000);
        stream.push(samples(120), false);
        let finish = stream.finish();
        assert_eq!(finish.windows.len(), 1);
        assert_eq!(finish.discarded, 20);
    }

    #[test]
    fn test_pushes_after_finish_are_ignored() {
        let mut stream = WindowStream::new(100, 100);
        stream.finish();
        let flush = stream.push(samples(500), true);
        assert!(flush.windows.is_empty());
        assert_eq!(flush.progress, 1.0);
        assert_eq!(stream.finish().discarded, 0);
    }
}
