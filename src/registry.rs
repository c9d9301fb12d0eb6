//! Site name to running supervisor.
//!
//! Writers for one site are serialized by that site's slot lock, held across the
//! whole drain-then-start sequence, so at most one supervisor per site ever runs.
//! The outer map lock is only held to find or insert a slot; other sites proceed
//! while one drains.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crate::error::MonitorError;
use crate::site::{normalize_site_name, SiteConfig};
use crate::supervisor::{MonitorContext, RunSummary, SiteSupervisor, SupervisorHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigureOutcome {
    Created,
    Updated,
}

#[derive(Default)]
struct SiteSlot {
    handle: Option<SupervisorHandle>,
    /// Set once the slot has been removed from the map; writers that raced the
    /// removal must look the site up again.
    retired: bool,
}

pub struct SupervisorRegistry {
    ctx: Arc<MonitorContext>,
    slots: Mutex<HashMap<String, Arc<Mutex<SiteSlot>>>>,
    configs: RwLock<HashMap<String, Arc<SiteConfig>>>,
    shutdown_grace: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SupervisorRegistry {
    pub fn new(ctx: Arc<MonitorContext>, shutdown_grace: Duration) -> Self {
        Self {
            ctx,
            slots: Mutex::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            shutdown_grace,
        }
    }

    pub fn context(&self) -> &Arc<MonitorContext> {
        &self.ctx
    }

    fn slot(&self, site: &str) -> Arc<Mutex<SiteSlot>> {
        lock(&self.slots)
            .entry(site.to_string())
            .or_default()
            .clone()
    }

    fn set_config(&self, config: Option<Arc<SiteConfig>>, site: &str) {
        let mut configs = self
            .configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match config {
            Some(config) => configs.insert(site.to_string(), config),
            None => configs.remove(site),
        };
    }

    /// Starts a supervisor for `config`, draining the site's previous one first.
    ///
    /// The caller blocks until the previous supervisor has stopped its recordings.
    /// If it fails to drain in time its processes are force-killed and the
    /// replacement starts anyway.
    pub fn reconfigure(&self, config: SiteConfig) -> Result<ConfigureOutcome> {
        let config = Arc::new(config);
        let site = config.name.clone();
        loop {
            let slot = self.slot(&site);
            let mut guard = lock(&slot);
            if guard.retired {
                continue;
            }

            let outcome = match guard.handle.take() {
                Some(previous) => {
                    log::info!("site {}: replacing supervisor", site);
                    if let Err(e) = previous.shutdown(self.shutdown_grace) {
                        log::error!("site {}: {}; starting replacement", site, e);
                    }
                    ConfigureOutcome::Updated
                }
                None => ConfigureOutcome::Created,
            };

            return match SiteSupervisor::spawn(config.clone(), self.ctx.clone()) {
                Ok(handle) => {
                    guard.handle = Some(handle);
                    self.set_config(Some(config), &site);
                    Ok(outcome)
                }
                Err(e) => {
                    self.set_config(None, &site);
                    Err(e)
                }
            };
        }
    }

    /// Stops and forgets a site.
    pub fn remove(&self, site: &str) -> Result<RunSummary> {
        let not_found = || MonitorError::SiteNotFound(site.to_string());
        let name = normalize_site_name(site).map_err(|_| not_found())?;
        let slot = lock(&self.slots).get(&name).cloned().ok_or_else(not_found)?;

        let mut guard = lock(&slot);
        if guard.retired {
            return Err(not_found().into());
        }
        let handle = guard.handle.take().ok_or_else(not_found)?;
        self.set_config(None, &name);
        let result = handle.shutdown(self.shutdown_grace);

        guard.retired = true;
        lock(&self.slots).remove(&name);
        drop(guard);

        log::info!("site {}: removed", name);
        match result {
            Ok(summary) => Ok(summary),
            Err(e) => {
                log::error!("site {}: {}", name, e);
                Ok(RunSummary {
                    site: name,
                    ..RunSummary::default()
                })
            }
        }
    }

    pub fn lookup(&self, site: &str) -> Option<Arc<SiteConfig>> {
        let name = normalize_site_name(site).ok()?;
        self.configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&name)
            .cloned()
    }

    /// Source identifier of a site's camera (1-based index).
    pub fn stream_source(&self, site: &str, index: usize) -> Result<String, MonitorError> {
        let config = self
            .lookup(site)
            .ok_or_else(|| MonitorError::SiteNotFound(site.to_string()))?;
        Ok(config.camera(index)?.source.clone())
    }

    /// Configured sites, sorted by name.
    pub fn sites(&self) -> Vec<Arc<SiteConfig>> {
        let mut sites: Vec<_> = self
            .configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        sites
    }

    /// Whether the site's supervisor thread is alive; `None` for unknown sites.
    /// Blocks while the site is being reconfigured.
    pub fn is_running(&self, site: &str) -> Option<bool> {
        let name = normalize_site_name(site).ok()?;
        let slot = lock(&self.slots).get(&name).cloned()?;
        let guard = lock(&slot);
        if guard.retired {
            return None;
        }
        guard.handle.as_ref().map(SupervisorHandle::is_running)
    }

    /// Number of supervisor threads currently alive. Blocks on sites that are
    /// being reconfigured.
    pub fn running_supervisors(&self) -> usize {
        let slots: Vec<_> = lock(&self.slots).values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                lock(slot)
                    .handle
                    .as_ref()
                    .map(SupervisorHandle::is_running)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Removes every site. Returns the drained summaries.
    pub fn shutdown_all(&self) -> Vec<RunSummary> {
        let names: Vec<String> = lock(&self.slots).keys().cloned().collect();
        names
            .iter()
            .filter_map(|name| match self.remove(name) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    log::debug!("shutdown of {} skipped: {:#}", name, e);
                    None
                }
            })
            .collect()
    }
}
