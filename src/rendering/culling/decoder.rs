//! Background pixel decoder
//!
//! Runs on its own thread so scanning a frame never stalls the tick thread.
//! Jobs and results travel over crossbeam channels; results carry the pass
//! number they were submitted with.

use super::color::ColorKey;
use super::target::PixelBuffer;
use super::{CullError, CullResult};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use rayon::prelude::*;
use std::collections::HashSet;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

const PARALLEL_CHUNK: usize = 64 * 1024;

pub struct DecodeJob {
    pub pass: u64,
    pub buffer: PixelBuffer,
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub pass: u64,
    pub colors: HashSet<ColorKey>,
}

fn scan(data: &[u8], colors: &mut HashSet<ColorKey>) {
    for px in data.chunks_exact(4) {
        let key = ColorKey::from_rgb(px[0], px[1], px[2]);
        if !key.is_background() {
            colors.insert(key);
        }
    }
}

/// Distinct non-background colors of an RGBA8 buffer; alpha is ignored.
///
/// Buffers of at least `parallel_threshold` bytes are scanned with rayon.
pub fn decode_colors(data: &[u8], parallel_threshold: usize) -> HashSet<ColorKey> {
    if data.len() < parallel_threshold {
        let mut colors = HashSet::new();
        scan(data, &mut colors);
        return colors;
    }

    data.par_chunks(PARALLEL_CHUNK)
        .map(|chunk| {
            let mut colors = HashSet::new();
            scan(chunk, &mut colors);
            colors
        })
        .reduce(HashSet::new, |mut a, b| {
            a.extend(b);
            a
        })
}

/// Handle to the decoder thread
pub struct DecodeWorker {
    jobs: Option<Sender<DecodeJob>>,
    results: Receiver<DecodedFrame>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(parallel_threshold: usize) -> CullResult<Self> {
        let (job_tx, job_rx) = unbounded::<DecodeJob>();
        let (result_tx, result_rx) = unbounded::<DecodedFrame>();

        let handle = thread::Builder::new()
            .name("cull-decoder".to_string())
            .spawn(move || {
                for job in job_rx.iter() {
                    let colors = decode_colors(&job.buffer.data, parallel_threshold);
                    trace!("Decoded pass {}: {} colors", job.pass, colors.len());
                    if result_tx.send(DecodedFrame { pass: job.pass, colors }).is_err() {
                        break;
                    }
                }
                debug!("Decoder thread exiting");
            })
            .map_err(|e| CullError::WorkerSpawn { reason: e.to_string() })?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, job: DecodeJob) -> CullResult<()> {
        match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|_| CullError::DecoderTerminated),
            None => Err(CullError::DecoderTerminated),
        }
    }

    pub fn try_recv(&self) -> CullResult<Option<DecodedFrame>> {
        match self.results.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CullError::DecoderTerminated),
        }
    }

    /// Stop accepting jobs and wait for the thread to finish
    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Decoder thread panicked");
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
