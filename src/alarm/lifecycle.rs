use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::alarm::calculator::compute_profile_in_tz;
use crate::alarm::model::{ClusterParams, ClusterProfile, format_wake_time};
use crate::alarm::persistence::{
    PersistenceError, delete_profile, load_draft, load_profile, save_draft, save_profile,
};
use crate::alarm::scheduler::{
    AlarmScheduler, CancelOutcome, OverlayPermission, SchedulerError, registrations_for,
};
use crate::alarm::tone::{Tone, default_tones};
use crate::store::KeyValueStore;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to persist the alarm cluster: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("alarm scheduler call failed: {0}")]
    SchedulerCall(#[from] SchedulerError),
    #[error("overlay permission is required to show alarms over the lock screen")]
    PermissionDenied,
    #[error("the alarm cluster is active; deactivate it before changing the configuration")]
    ClusterLocked,
    #[error("another alarm cluster operation is already in progress")]
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    Inactive,
    Active(ClusterProfile),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReport {
    Inactive,
    InSync { pending: usize },
    Reregistered { pending: usize },
    CancelledOrphans { cancelled: usize },
    Expired,
}

/// Owns the single alarm cluster: the draft being edited, the active profile, and
/// the calls out to storage and the native scheduler.
pub struct ClusterManager<S, A, P> {
    store: S,
    scheduler: A,
    permission: P,
    state: ClusterState,
    draft: ClusterParams,
    degraded_acknowledged: bool,
}

impl<S, A, P> ClusterManager<S, A, P>
where
    S: KeyValueStore,
    A: AlarmScheduler,
    P: OverlayPermission,
{
    /// Starts Inactive with a default draft; call `restore_on_startup` to load
    /// persisted state.
    pub fn new(store: S, scheduler: A, permission: P) -> Self {
        Self {
            store,
            scheduler,
            permission,
            state: ClusterState::Inactive,
            draft: ClusterParams::default(),
            degraded_acknowledged: false,
        }
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ClusterState::Active(_))
    }

    pub fn active_profile(&self) -> Option<&ClusterProfile> {
        match &self.state {
            ClusterState::Active(profile) => Some(profile),
            ClusterState::Inactive => None,
        }
    }

    pub fn draft(&self) -> &ClusterParams {
        &self.draft
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn scheduler(&self) -> &A {
        &self.scheduler
    }

    /// Rebuilds in-memory state from storage. The persisted wake time is already
    /// resolved and is used as-is.
    pub fn restore_on_startup(&mut self) -> Result<&ClusterState, ClusterError> {
        match load_profile(&self.store)? {
            Some(profile) => {
                self.draft = ClusterParams::new(
                    profile.wake_time.with_timezone(&Local).time(),
                    i64::from(profile.interval_minutes),
                    i64::from(profile.alarm_count),
                    profile.tone_pool.clone(),
                );
                info!(
                    "event=cluster_restore module=lifecycle status=active wake_time={} alarms={}",
                    format_wake_time(profile.wake_time),
                    profile.alarm_count
                );
                self.state = ClusterState::Active(profile);
            }
            None => {
                self.draft = load_draft(&self.store)?.unwrap_or_default();
                debug!("event=cluster_restore module=lifecycle status=inactive");
                self.state = ClusterState::Inactive;
            }
        }
        Ok(&self.state)
    }

    /// Applies `edit` to the draft and persists it. Refused while a cluster is active
    /// so the displayed and registered schedules cannot diverge.
    pub fn edit_draft<R>(
        &mut self,
        edit: impl FnOnce(&mut ClusterParams) -> R,
    ) -> Result<R, ClusterError> {
        if self.is_active() {
            return Err(ClusterError::ClusterLocked);
        }
        let result = edit(&mut self.draft);
        save_draft(&mut self.store, &self.draft)?;
        Ok(result)
    }

    pub fn set_wake_time(&mut self, wake_time_of_day: NaiveTime) -> Result<(), ClusterError> {
        self.edit_draft(|draft| draft.set_wake_time_of_day(wake_time_of_day))
    }

    pub fn set_interval(&mut self, raw: &str) -> Result<u32, ClusterError> {
        self.edit_draft(|draft| {
            draft.set_interval(raw);
            draft.interval_minutes()
        })
    }

    pub fn set_alarm_count(&mut self, raw: &str) -> Result<u32, ClusterError> {
        self.edit_draft(|draft| {
            draft.set_alarm_count(raw);
            draft.alarm_count()
        })
    }

    pub fn add_default_tones(&mut self, selected: Vec<Tone>) -> Result<usize, ClusterError> {
        self.edit_draft(|draft| draft.tone_pool_mut().add_default_tones(selected))
    }

    /// An empty selection is a cancelled picker and changes nothing.
    pub fn add_custom_tones(&mut self, selected: Vec<Tone>) -> Result<usize, ClusterError> {
        if selected.is_empty() {
            return Ok(0);
        }
        self.edit_draft(|draft| draft.tone_pool_mut().add_custom_tones(selected))
    }

    pub fn remove_tone(&mut self, uri: &str) -> Result<Option<Tone>, ClusterError> {
        self.edit_draft(|draft| draft.tone_pool_mut().remove_tone(uri))
    }

    pub fn available_default_tones(&self) -> Vec<Tone> {
        self.draft.tone_pool().available_default_tones(&default_tones())
    }

    pub fn preview(&self) -> Result<ClusterProfile, ClusterError> {
        self.preview_in_tz(&Local::now())
    }

    pub fn preview_in_tz<Tz>(&self, now: &DateTime<Tz>) -> Result<ClusterProfile, ClusterError>
    where
        Tz: TimeZone,
        Tz::Offset: Copy,
    {
        if self.is_active() {
            return Err(ClusterError::ClusterLocked);
        }
        Ok(compute_profile_in_tz(&self.draft, now))
    }

    pub fn overlay_permission_missing(&self) -> bool {
        self.permission.is_required() && !self.permission.has_permission()
    }

    pub fn request_overlay_permission(&mut self) -> bool {
        let granted = self.permission.request_permission();
        info!("event=overlay_permission module=lifecycle granted={granted}");
        granted
    }

    /// Lets the next `activate` proceed without the overlay permission; alarms may
    /// then not show over the lock screen. Consumed by that activation attempt.
    pub fn acknowledge_degraded_mode(&mut self) {
        self.degraded_acknowledged = true;
    }

    pub fn activate(
        &mut self,
        params: impl Into<ClusterParams>,
    ) -> Result<ClusterProfile, ClusterError> {
        self.activate_in_tz(params, &Local::now())
    }

    pub fn activate_draft(&mut self) -> Result<ClusterProfile, ClusterError> {
        let draft = self.draft.clone();
        self.activate(draft)
    }

    pub fn activate_draft_in_tz<Tz>(
        &mut self,
        now: &DateTime<Tz>,
    ) -> Result<ClusterProfile, ClusterError>
    where
        Tz: TimeZone,
        Tz::Offset: Copy,
    {
        let draft = self.draft.clone();
        self.activate_in_tz(draft, now)
    }

    /// Inactive -> Active. The profile is persisted before the scheduler is called;
    /// a scheduler failure deletes it again and leaves the manager Inactive.
    pub fn activate_in_tz<Tz>(
        &mut self,
        params: impl Into<ClusterParams>,
        now: &DateTime<Tz>,
    ) -> Result<ClusterProfile, ClusterError>
    where
        Tz: TimeZone,
        Tz::Offset: Copy,
    {
        let degraded_acknowledged = std::mem::take(&mut self.degraded_acknowledged);
        if self.is_active() {
            return Err(ClusterError::ClusterLocked);
        }
        let params = params.into();

        if self.overlay_permission_missing() {
            if !degraded_acknowledged {
                warn!("event=cluster_activate module=lifecycle status=blocked reason=overlay_permission");
                return Err(ClusterError::PermissionDenied);
            }
            warn!("event=cluster_activate module=lifecycle status=degraded reason=overlay_permission");
        }

        let profile = compute_profile_in_tz(&params, now);
        save_profile(&mut self.store, &profile).inspect_err(|err| {
            error!("event=cluster_activate module=lifecycle status=error stage=persist error={err}");
        })?;

        if let Err(err) = self.scheduler.set_alarm_cluster(&profile) {
            error!("event=cluster_activate module=lifecycle status=error stage=schedule error={err}");
            self.roll_back_activation();
            return Err(ClusterError::SchedulerCall(err));
        }

        self.draft = params;
        if let Err(err) = save_draft(&mut self.store, &self.draft) {
            warn!("event=draft_save module=lifecycle status=error error={err}");
        }
        info!(
            "event=cluster_activate module=lifecycle status=ok wake_time={} interval={} alarms={} tones={}",
            format_wake_time(profile.wake_time),
            profile.interval_minutes,
            profile.alarm_count,
            profile.tone_pool.len()
        );
        self.state = ClusterState::Active(profile.clone());
        Ok(profile)
    }

    fn roll_back_activation(&mut self) {
        if let Err(err) = delete_profile(&mut self.store) {
            error!("event=cluster_rollback module=lifecycle status=error stage=delete error={err}");
        }
        if let Err(err) = self.scheduler.cancel_all_alarms() {
            warn!("event=cluster_rollback module=lifecycle status=error stage=cancel error={err}");
        }
        self.state = ClusterState::Inactive;
    }

    /// Active -> Inactive. Returns `false` when there was nothing to deactivate.
    /// On failure the manager stays Active so a retry repeats the whole sequence.
    pub fn deactivate(&mut self) -> Result<bool, ClusterError> {
        if !self.is_active() {
            debug!("event=cluster_deactivate module=lifecycle status=noop");
            return Ok(false);
        }

        match self.scheduler.cancel_all_alarms()? {
            CancelOutcome::Cancelled(count) => {
                debug!("event=cluster_deactivate module=lifecycle stage=cancel cancelled={count}");
            }
            CancelOutcome::NothingToCancel => {
                debug!("event=cluster_deactivate module=lifecycle stage=cancel cancelled=0");
            }
        }
        self.scheduler.stop_current_sound()?;
        delete_profile(&mut self.store)?;

        self.state = ClusterState::Inactive;
        info!("event=cluster_deactivate module=lifecycle status=ok");
        Ok(true)
    }

    pub fn stop_current_sound(&mut self) -> Result<(), ClusterError> {
        self.scheduler.stop_current_sound()?;
        Ok(())
    }

    /// Cross-checks what the scheduler holds against the persisted cluster and
    /// repairs divergence left behind by a partial failure.
    pub fn reconcile(&mut self, now: DateTime<Utc>) -> Result<ReconcileReport, ClusterError> {
        let registered = self.scheduler.registered_alarms()?;
        let report = match &self.state {
            ClusterState::Inactive if registered.is_empty() => ReconcileReport::Inactive,
            ClusterState::Inactive => match self.scheduler.cancel_all_alarms()? {
                CancelOutcome::Cancelled(cancelled) => ReconcileReport::CancelledOrphans { cancelled },
                CancelOutcome::NothingToCancel => ReconcileReport::Inactive,
            },
            ClusterState::Active(profile) => {
                let pending = registrations_for(profile)
                    .into_iter()
                    .filter(|expected| expected.fire_at > now)
                    .collect::<Vec<_>>();
                if pending.is_empty() {
                    ReconcileReport::Expired
                } else if pending.iter().all(|expected| registered.contains(expected)) {
                    ReconcileReport::InSync {
                        pending: pending.len(),
                    }
                } else {
                    self.scheduler.set_alarm_cluster(profile)?;
                    ReconcileReport::Reregistered {
                        pending: pending.len(),
                    }
                }
            }
        };
        info!("event=cluster_reconcile module=lifecycle status=ok report={report:?}");
        Ok(report)
    }
}

/// Shared handle for hosts that serve several callers. Mutating operations fail
/// fast with `Busy` instead of queueing behind one already in flight.
pub struct SharedCluster<S, A, P> {
    inner: Arc<Mutex<ClusterManager<S, A, P>>>,
}

impl<S, A, P> Clone for SharedCluster<S, A, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, P> SharedCluster<S, A, P> {
    pub fn new(manager: ClusterManager<S, A, P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn exclusive<R>(
        &self,
        op: impl FnOnce(&mut ClusterManager<S, A, P>) -> Result<R, ClusterError>,
    ) -> Result<R, ClusterError> {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                warn!("event=cluster_op module=lifecycle status=busy");
                return Err(ClusterError::Busy);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        op(&mut guard)
    }

    /// Waits for any in-flight operation, then reads.
    pub fn inspect<R>(&self, view: impl FnOnce(&ClusterManager<S, A, P>) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        view(&guard)
    }
}
