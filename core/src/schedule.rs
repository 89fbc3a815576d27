use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateauMode {
    /// The monitored metric should decrease (losses).
    Min,
    /// The monitored metric should increase (accuracies).
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub mode: PlateauMode,
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    /// Relative improvement needed to reset the patience counter.
    pub threshold: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            mode: PlateauMode::Min,
            factor: 0.1,
            patience: 10,
            min_lr: 0.0,
            threshold: 1e-4,
        }
    }
}

impl PlateauConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err(format!("scheduler factor {} outside (0, 1)", self.factor));
        }
        if self.min_lr < 0.0 || self.threshold < 0.0 {
            return Err("scheduler min_lr and threshold must be non-negative".into());
        }
        Ok(())
    }
}

/// Reduces the learning rate when a monitored metric stops improving.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    lr: f64,
    best: Option<f64>,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(config: PlateauConfig, initial_lr: f64) -> Self {
        Self {
            config,
            lr: initial_lr,
            best: None,
            bad_epochs: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    fn improves(&self, metric: f64, best: f64) -> bool {
        match self.config.mode {
            PlateauMode::Min => metric < best * (1.0 - self.config.threshold),
            PlateauMode::Max => metric > best * (1.0 + self.config.threshold),
        }
    }

    /// Records one epoch's metric and returns the learning rate to use next.
    pub fn step(&mut self, metric: f64) -> f64 {
        match self.best {
            Some(best) if !self.improves(metric, best) => self.bad_epochs += 1,
            _ => {
                self.best = Some(metric);
                self.bad_epochs = 0;
            }
        }

        if self.bad_epochs > self.config.patience {
            let reduced = (self.lr * self.config.factor).max(self.config.min_lr);
            if reduced < self.lr {
                log::info!("plateau: learning rate {:.3e} -> {:.3e}", self.lr, reduced);
            }
            self.lr = reduced;
            self.bad_epochs = 0;
        }
        self.lr
    }
}
