// ── Reset watchdog ──
//
// Samples the reset input on a fixed period. A press held for at least
// `hold_samples` fires on release; a press that reaches `ceiling_samples`
// fires immediately. One press fires at most once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ResetSettings;
use crate::hal::ResetInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryResetRequested;

/// Debounces raw samples into at most one request per press.
#[derive(Debug, Clone)]
pub struct ResetDetector {
    hold_samples: u32,
    ceiling_samples: u32,
    held: u32,
    fired: bool,
}

impl ResetDetector {
    pub fn new(settings: &ResetSettings) -> Self {
        Self {
            hold_samples: settings.hold_samples,
            ceiling_samples: settings.ceiling_samples.max(settings.hold_samples),
            held: 0,
            fired: false,
        }
    }

    pub fn sample(&mut self, pressed: bool) -> Option<FactoryResetRequested> {
        if pressed {
            if self.fired {
                return None;
            }
            self.held = self.held.saturating_add(1);
            if self.held >= self.ceiling_samples {
                self.fired = true;
                return Some(FactoryResetRequested);
            }
            return None;
        }

        let fire = !self.fired && self.held >= self.hold_samples;
        if self.held > 0 && !fire {
            debug!(held = self.held, "reset input released early");
        }
        self.held = 0;
        self.fired = false;
        fire.then_some(FactoryResetRequested)
    }
}

pub struct ResetWatchdog;

impl ResetWatchdog {
    /// Spawn the sampling task. It exits on cancellation or when `tx` closes.
    pub fn spawn(
        input: Arc<dyn ResetInput>,
        settings: &ResetSettings,
        tx: mpsc::Sender<FactoryResetRequested>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut detector = ResetDetector::new(settings);
        let period = settings.sample_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Some(request) = detector.sample(input.is_pressed()) {
                            info!("Factory reset requested from reset input");
                            if tx.send(request).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}
