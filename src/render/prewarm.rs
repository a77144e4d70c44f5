//! Best-effort background build of pyramid levels after a load.
//!
//! The task works on a shared snapshot of the working raster and hands each
//! finished level back over a channel.  The owner polls with
//! [`PrewarmTask::drain_into`] once per frame; levels built from an outdated
//! content version are discarded there.  Dropping the task cancels it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};

use super::pyramid::{PyramidCache, PyramidLevel, build_level, prewarm_factors};
use crate::canvas::WorkingRaster;

pub struct PrewarmTask {
    cancel: Arc<AtomicBool>,
    receiver: Receiver<PyramidLevel>,
    version: u64,
    finished: bool,
}

impl PrewarmTask {
    /// Start building the levels suited to the raster's size.
    pub fn spawn(working: &WorkingRaster) -> Self {
        let megapixels = working.width() as f64 * working.height() as f64 / 1_000_000.0;
        Self::spawn_levels(working, prewarm_factors(megapixels).to_vec())
    }

    pub fn spawn_levels(working: &WorkingRaster, factors: Vec<f64>) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let pixels = working.shared();
        let flag = Arc::clone(&cancel);
        rayon::spawn(move || {
            for factor in factors {
                if flag.load(Ordering::Relaxed) {
                    return;
                }
                match build_level(&pixels, factor) {
                    Ok(level) => {
                        if tx.send(level).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        crate::log_warn!("prewarm: level {} skipped: {}", factor, e);
                    }
                }
            }
        });
        Self {
            cancel,
            receiver: rx,
            version: working.version(),
            finished: false,
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// True once the worker has exited and every level was collected.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Move finished levels into `cache`.  Returns how many were adopted.
    /// A content change since the task started cancels it.
    pub fn drain_into(&mut self, cache: &mut PyramidCache, working: &WorkingRaster) -> usize {
        if working.version() != self.version {
            self.cancel();
        }
        let mut adopted = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(level) => {
                    if !self.is_cancelled() && cache.adopt(self.version, level, working) {
                        adopted += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    break;
                }
            }
        }
        adopted
    }

    /// Block until the worker exits, adopting everything it built.
    pub fn wait_into(mut self, cache: &mut PyramidCache, working: &WorkingRaster) -> usize {
        let mut adopted = 0;
        while let Ok(level) = self.receiver.recv() {
            if working.version() == self.version && cache.adopt(self.version, level, working) {
                adopted += 1;
            }
        }
        self.finished = true;
        adopted
    }
}

impl Drop for PrewarmTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::SourceRaster;
    use image::{Rgb, RgbImage};

    fn working(w: u32, h: u32) -> WorkingRaster {
        WorkingRaster::from_source(&SourceRaster::new(RgbImage::from_pixel(w, h, Rgb([1, 2, 3]))))
    }

    #[test]
    fn small_images_prewarm_quarter_and_half() {
        assert_eq!(prewarm_factors(4.0), &[0.25, 0.5]);
        assert_eq!(prewarm_factors(20.0), &[0.1, 0.25, 0.5]);
        assert_eq!(prewarm_factors(60.0), &[0.05, 0.1, 0.25, 0.5]);
    }

    #[test]
    fn finished_levels_land_in_the_cache() {
        let wr = working(200, 100);
        let mut cache = PyramidCache::with_budget(1 << 30);
        let task = PrewarmTask::spawn(&wr);
        assert_eq!(task.wait_into(&mut cache, &wr), 2);
        assert!(cache.contains(0.25));
        assert!(cache.contains(0.5));
    }

    #[test]
    fn content_change_discards_results() {
        let mut wr = working(200, 100);
        let mut cache = PyramidCache::with_budget(1 << 30);
        let task = PrewarmTask::spawn_levels(&wr, vec![0.5]);
        wr.punch_hole(&[(0.0, 0.0), (20.0, 0.0), (0.0, 20.0)], Rgb([255, 255, 255]));
        assert_eq!(task.wait_into(&mut cache, &wr), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn cancelled_task_adopts_nothing() {
        let wr = working(64, 64);
        let mut cache = PyramidCache::with_budget(1 << 30);
        let mut task = PrewarmTask::spawn_levels(&wr, vec![0.5, 0.25]);
        task.cancel();
        while !task.is_finished() {
            task.drain_into(&mut cache, &wr);
            std::thread::yield_now();
        }
        assert!(cache.is_empty());
    }
}
