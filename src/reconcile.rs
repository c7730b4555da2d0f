// Copyright 2025 The Scheduled Scaling Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-object state machine.
//!
//! ```text
//!  Pending ──window opens──▶ Active ──window closes──▶ Pending (cron)
//!     ▲                        │                  └──▶ Completed (time)
//!     └──── spec change ──── Failed ◀── invalid spec / target lost
//! ```
//!
//! A pass reads the object, evaluates the schedule at the injected clock's
//! `now`, applies or reverts the override and returns the instant it wants to
//! be woken at. kube-runtime serializes passes per object.

use crate::clock::Clock;
use crate::context::Context;
use crate::schedule::CompiledSchedule;
use crate::store::ObjectStore;
use crate::target;
use crate::types::v1alpha1::scheduled_scaling::{CLEANUP_FINALIZER, ScheduledScaling};
use crate::types::v1alpha1::status::{Phase, Reason, ScheduledScalingStatus};
use crate::validation;
use crate::{context, types};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry interval while the target tortoise does not exist yet.
pub const TARGET_MISSING_RETRY: TimeDelta = TimeDelta::minutes(5);

/// Retry interval while another scheduled scaling holds the target.
pub const CONFLICT_RETRY: TimeDelta = TimeDelta::seconds(30);

pub const MIN_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Target { source: target::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Context { source } => source.is_not_found(),
            Error::Target { source } => source.is_not_found(),
            Error::Types { .. } => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Context { source } => source.is_conflict(),
            Error::Target { source } => source.is_conflict(),
            Error::Types { .. } => false,
        }
    }
}

pub async fn reconcile_scheduled_scaling(
    resource: Arc<ScheduledScaling>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let namespace = resource.namespace()?;
    let name = resource.name();

    let wake_at = reconcile_object(ctx.as_ref(), ctx.clock.as_ref(), &namespace, &name).await?;
    let action = match requeue_delay(wake_at, ctx.clock.now()) {
        Some(delay) => {
            debug!(%namespace, %name, ?delay, "requeue");
            Action::requeue(delay)
        }
        None => Action::await_change(),
    };
    Ok(action)
}

/// Converts an absolute wake-up instant into a delay, never shorter than
/// [`MIN_REQUEUE`].
pub fn requeue_delay(wake_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    let wake_at = wake_at?;
    let delay = (wake_at - now).to_std().unwrap_or(Duration::ZERO);
    Some(delay.max(MIN_REQUEUE))
}

/// One reconcile pass. Returns when the object next needs attention, `None`
/// when only a change to it can move it forward.
pub async fn reconcile_object<S: ObjectStore>(
    store: &S,
    clock: &dyn Clock,
    namespace: &str,
    name: &str,
) -> Result<Option<DateTime<Utc>>, Error> {
    let Some(resource) = store.get_scheduled_scaling(namespace, name).await? else {
        debug!(%namespace, %name, "ScheduledScaling is gone");
        return Ok(None);
    };
    let now = clock.now();

    if resource.metadata.deletion_timestamp.is_some() {
        finalize(store, &resource).await?;
        return Ok(None);
    }

    if !resource.has_cleanup_finalizer() {
        let mut finalizers = resource.finalizers().to_vec();
        finalizers.push(CLEANUP_FINALIZER.to_owned());
        store.set_finalizers(&resource, finalizers).await?;
    }

    let phase = resource.phase();
    let observed = resource.status.as_ref().and_then(|s| s.observed_generation);
    if phase == Phase::Failed && observed == resource.metadata.generation {
        debug!(%namespace, %name, "failed and unchanged since, skipping");
        return Ok(None);
    }

    let compiled = match validation::validate_spec(&resource.spec) {
        Ok(compiled) => compiled,
        Err(e) => {
            warn!(%namespace, %name, "invalid ScheduledScaling: {}", e);
            revert_quietly(store, &resource).await?;
            let message = e.to_string();
            if update_status(store, &resource, now, Phase::Failed, Reason::InvalidSpec, &message).await? {
                store
                    .record(&resource, EventType::Warning, Reason::InvalidSpec, &message)
                    .await?;
            }
            return Ok(None);
        }
    };

    match compiled.is_active(now) {
        (true, Some(ends_at)) => activate(store, &resource, phase, now, ends_at).await,
        _ => deactivate(store, &resource, phase, &compiled, now).await,
    }
}

/// Inside a window: apply the override, or confirm and repair it.
async fn activate<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    phase: Phase,
    now: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, Error> {
    let tortoise = resource.tortoise_name();

    match target::apply_override(store, resource, now).await {
        Ok(applied) => {
            if applied.changed {
                let note = match applied.min_replicas {
                    Some(min) => format!("override applied to tortoise {tortoise} (minReplicas {min})"),
                    None => format!("override applied to tortoise {tortoise}"),
                };
                store
                    .record(resource, EventType::Normal, Reason::OverrideApplied, &note)
                    .await?;
                if let Some(warning) = &applied.warning {
                    store
                        .record(resource, EventType::Warning, Reason::HpaRecommendationHigher, warning)
                        .await?;
                }
            }

            let message = applied.warning.unwrap_or_else(|| {
                format!(
                    "override active on tortoise {} until {}",
                    tortoise,
                    ends_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                )
            });
            update_status(store, resource, now, Phase::Active, Reason::OverrideApplied, &message).await?;
            Ok(Some(ends_at))
        }
        Err(e) if e.is_not_found() && phase == Phase::Active => {
            lose_target(store, resource, now).await?;
            Ok(None)
        }
        Err(e) if e.is_not_found() => {
            warn!(name = %resource.name(), %tortoise, "target tortoise not found, will retry");
            let message = format!("target tortoise {tortoise} not found");
            update_status(store, resource, now, Phase::Pending, Reason::TargetMissing, &message).await?;
            Ok(Some((now + TARGET_MISSING_RETRY).min(ends_at)))
        }
        Err(e) if e.is_overridden() => {
            let message = e.to_string();
            info!(name = %resource.name(), "{}", message);
            if update_status(store, resource, now, Phase::Pending, Reason::Conflict, &message).await? {
                store
                    .record(resource, EventType::Warning, Reason::Conflict, &message)
                    .await?;
            }
            Ok(Some((now + CONFLICT_RETRY).min(ends_at)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Outside any window. Whatever the stored phase says, an override this
/// object still owns on the tortoise is reverted first.
async fn deactivate<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    phase: Phase,
    compiled: &CompiledSchedule,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, Error> {
    match target::revert_override(store, resource).await {
        Ok(restored) => {
            if restored {
                let note = format!("override reverted on tortoise {}", resource.tortoise_name());
                store
                    .record(resource, EventType::Normal, Reason::OverrideReverted, &note)
                    .await?;
            }
        }
        Err(e) if e.is_not_found() && phase == Phase::Active => {
            lose_target(store, resource, now).await?;
            return Ok(None);
        }
        Err(e) if e.is_not_found() => {
            debug!(name = %resource.name(), "target tortoise not found, nothing to revert");
        }
        Err(e) => return Err(report_revert_failure(store, resource, e).await),
    }

    idle(store, resource, compiled, now).await
}

/// Outside any window with nothing left applied.
async fn idle<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    compiled: &CompiledSchedule,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, Error> {
    if compiled.is_finished(now) {
        update_status(store, resource, now, Phase::Completed, Reason::Completed, "schedule has finished").await?;
        return Ok(None);
    }

    let next = compiled.next_start(now);
    let message = match next {
        Some(at) => format!("next window starts at {}", at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => "no upcoming window".to_owned(),
    };
    update_status(store, resource, now, Phase::Pending, Reason::Scheduled, &message).await?;
    Ok(next)
}

async fn lose_target<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let message = format!("target tortoise {} no longer exists", resource.tortoise_name());
    warn!(name = %resource.name(), "{}", message);
    if update_status(store, resource, now, Phase::Failed, Reason::TargetLost, &message).await? {
        store
            .record(resource, EventType::Warning, Reason::TargetLost, &message)
            .await?;
    }
    Ok(())
}

/// Revert where a missing target simply means there is nothing to undo.
async fn revert_quietly<S: ObjectStore>(store: &S, resource: &ScheduledScaling) -> Result<(), Error> {
    match target::revert_override(store, resource).await {
        Ok(true) => {
            let note = format!("override reverted on tortoise {}", resource.tortoise_name());
            store
                .record(resource, EventType::Normal, Reason::OverrideReverted, &note)
                .await?;
            Ok(())
        }
        Ok(false) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(report_revert_failure(store, resource, e).await),
    }
}

async fn report_revert_failure<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    error: target::Error,
) -> Error {
    if matches!(error, target::Error::RevertConflict { .. })
        && let Err(e) = store
            .record(resource, EventType::Warning, Reason::RevertConflict, &error.to_string())
            .await
    {
        warn!(name = %resource.name(), "record event error: {}", e);
    }
    error.into()
}

/// Deletion: undo the override, then let the object go.
async fn finalize<S: ObjectStore>(store: &S, resource: &ScheduledScaling) -> Result<(), Error> {
    if !resource.has_cleanup_finalizer() {
        return Ok(());
    }

    revert_quietly(store, resource).await?;

    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| *f != CLEANUP_FINALIZER)
        .cloned()
        .collect();
    store.set_finalizers(resource, finalizers).await?;
    info!(name = %resource.name(), "cleanup finalizer removed");
    Ok(())
}

/// Writes status when phase, reason, message or observed generation differ
/// from what is stored. Returns whether a write happened.
async fn update_status<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    now: DateTime<Utc>,
    phase: Phase,
    reason: Reason,
    message: &str,
) -> Result<bool, Error> {
    let current = resource.status.clone().unwrap_or_default();

    let last_transition_time = if current.phase != phase || current.last_transition_time.is_none() {
        Some(now.to_rfc3339_opts(SecondsFormat::Secs, true))
    } else {
        current.last_transition_time.clone()
    };

    let next = ScheduledScalingStatus {
        phase,
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.to_owned()),
        observed_generation: resource.metadata.generation,
    };

    if next == current {
        return Ok(false);
    }

    if next.phase != current.phase {
        info!(
            name = %resource.name(),
            from = %current.phase,
            to = %next.phase,
            reason = %reason,
            "phase transition"
        );
    }
    store.patch_status(resource, &next).await?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::overrides::{ORIGINAL_SPEC_ANNOTATION, hpa_warning, owner_of};
    use crate::tests::{
        FakeStore, TEST_NAMESPACE, TEST_TORTOISE, create_test_scheduled_scaling, create_test_tortoise,
        cron_scheduled_scaling, replicas_strategy, scheduled_scaling_with_strategy, time_scheduled_scaling,
        tortoise_with_recommendation,
    };

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn status(store: &FakeStore, name: &str) -> ScheduledScalingStatus {
        store
            .scheduled_scaling(TEST_NAMESPACE, name)
            .unwrap()
            .status
            .unwrap_or_default()
    }

    fn tortoise(store: &FakeStore) -> crate::types::v1beta3::tortoise::Tortoise {
        store.tortoise(TEST_NAMESPACE, TEST_TORTOISE).unwrap()
    }

    async fn pass(store: &FakeStore, clock: &FixedClock) -> Option<DateTime<Utc>> {
        reconcile_object(store, clock, TEST_NAMESPACE, "test-ss").await.unwrap()
    }

    fn setup(resource: ScheduledScaling, target: crate::types::v1beta3::tortoise::Tortoise) -> FakeStore {
        let store = FakeStore::default();
        store.put_scheduled_scaling(resource);
        store.put_tortoise(target);
        store
    }

    #[test]
    fn test_requeue_delay() {
        let now = at("2024-01-15T10:00:00Z");
        assert_eq!(requeue_delay(None, now), None);
        assert_eq!(
            requeue_delay(Some(at("2024-01-15T18:00:00Z")), now),
            Some(Duration::from_secs(8 * 3600))
        );
        assert_eq!(requeue_delay(Some(now), now), Some(MIN_REQUEUE));
        assert_eq!(requeue_delay(Some(at("2024-01-15T09:00:00Z")), now), Some(MIN_REQUEUE));
    }

    #[tokio::test]
    async fn test_before_window_waits_for_start() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T09:00:00Z"));

        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T10:00:00Z")));

        let status = status(&store, "test-ss");
        assert_eq!(status.phase, Phase::Pending);
        assert_eq!(status.reason.as_deref(), Some("Scheduled"));
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(store.tortoise_patches(), 0);
        assert!(store
            .scheduled_scaling(TEST_NAMESPACE, "test-ss")
            .unwrap()
            .has_cleanup_finalizer());
    }

    #[tokio::test]
    async fn test_past_time_schedule_completes_without_touching_target() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T19:00:00Z"));

        assert_eq!(pass(&store, &clock).await, None);
        assert_eq!(status(&store, "test-ss").phase, Phase::Completed);
        assert_eq!(store.tortoise_patches(), 0);
    }

    #[tokio::test]
    async fn test_override_left_without_active_status_is_reverted() {
        // the tortoise was patched but the Active status never got written
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let resource = store.scheduled_scaling(TEST_NAMESPACE, "test-ss").unwrap();
        target::apply_override(&store, &resource, at("2024-01-15T12:00:00Z"))
            .await
            .unwrap();
        assert_eq!(status(&store, "test-ss").phase, Phase::Pending);

        let clock = FixedClock::new(at("2024-01-15T19:00:00Z"));
        assert_eq!(pass(&store, &clock).await, None);

        assert_eq!(status(&store, "test-ss").phase, Phase::Completed);
        assert_eq!(owner_of(&tortoise(&store)), None);
        assert_eq!(tortoise(&store).spec, create_test_tortoise().spec);
        assert_eq!(store.event_reasons(), vec!["OverrideReverted"]);
    }

    #[tokio::test]
    async fn test_invalid_spec_reverts_override_whatever_the_phase() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let resource = store.scheduled_scaling(TEST_NAMESPACE, "test-ss").unwrap();
        target::apply_override(&store, &resource, at("2024-01-15T12:00:00Z"))
            .await
            .unwrap();

        store.update_spec(TEST_NAMESPACE, "test-ss", |spec| {
            spec.schedule.duration = Some("1h".to_owned());
        });
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;

        assert_eq!(status(&store, "test-ss").phase, Phase::Failed);
        assert_eq!(owner_of(&tortoise(&store)), None);
        assert_eq!(tortoise(&store).spec, create_test_tortoise().spec);
    }

    #[tokio::test]
    async fn test_missing_target_outside_window_is_not_an_error() {
        let store = FakeStore::default();
        store.put_scheduled_scaling(create_test_scheduled_scaling());
        let clock = FixedClock::new(at("2024-01-15T09:00:00Z"));

        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T10:00:00Z")));
        assert_eq!(status(&store, "test-ss").phase, Phase::Pending);
    }

    #[tokio::test]
    async fn test_recommendation_below_request_applies_request() {
        let store = setup(create_test_scheduled_scaling(), tortoise_with_recommendation(3));
        let clock = FixedClock::new(at("2024-01-15T10:30:00Z"));

        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T18:00:00Z")));

        assert_eq!(tortoise(&store).spec.min_replicas, Some(5));
        let status = status(&store, "test-ss");
        assert_eq!(status.phase, Phase::Active);
        assert!(!status.message.unwrap().contains("HPA"));
        assert_eq!(store.event_reasons(), vec!["OverrideApplied"]);
    }

    #[tokio::test]
    async fn test_recommendation_above_request_is_kept_with_warning() {
        let store = setup(
            scheduled_scaling_with_strategy(replicas_strategy(2)),
            tortoise_with_recommendation(5),
        );
        let clock = FixedClock::new(at("2024-01-15T10:30:00Z"));
        pass(&store, &clock).await;

        assert_eq!(tortoise(&store).spec.min_replicas, Some(5));
        let status = status(&store, "test-ss");
        assert_eq!(status.phase, Phase::Active);
        assert!(status.message.unwrap().contains(&hpa_warning(2, 5)));
        assert_eq!(
            store.event_reasons(),
            vec!["OverrideApplied", "HPARecommendationHigher"]
        );
    }

    #[tokio::test]
    async fn test_override_held_exactly_while_active() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T09:00:00Z"));

        pass(&store, &clock).await;
        assert_eq!(owner_of(&tortoise(&store)), None);

        clock.set(at("2024-01-15T10:00:01Z"));
        pass(&store, &clock).await;
        assert_eq!(status(&store, "test-ss").phase, Phase::Active);
        assert_eq!(owner_of(&tortoise(&store)).map(|o| o.uid).as_deref(), Some("ss-uid-1"));

        // a pass in the middle of the window changes nothing
        let writes = store.status_writes();
        clock.set(at("2024-01-15T12:00:00Z"));
        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T18:00:00Z")));
        assert_eq!(store.tortoise_patches(), 1);
        assert_eq!(store.status_writes(), writes);

        clock.set(at("2024-01-15T18:00:00Z"));
        assert_eq!(pass(&store, &clock).await, None);
        assert_eq!(status(&store, "test-ss").phase, Phase::Completed);
        assert_eq!(owner_of(&tortoise(&store)), None);
        assert_eq!(tortoise(&store).spec, create_test_tortoise().spec);
        assert_eq!(
            store.event_reasons(),
            vec!["OverrideApplied", "OverrideReverted"]
        );
    }

    #[tokio::test]
    async fn test_drift_is_repaired_while_active() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;

        let mut drifted = tortoise(&store);
        drifted.spec.min_replicas = Some(1);
        store.put_tortoise(drifted);

        pass(&store, &clock).await;
        assert_eq!(tortoise(&store).spec.min_replicas, Some(5));
        assert_eq!(status(&store, "test-ss").phase, Phase::Active);
    }

    #[tokio::test]
    async fn test_cron_schedule_oscillates() {
        let store = setup(
            cron_scheduled_scaling("0 9 * * 1-5", "8h", Some("Asia/Tokyo")),
            create_test_tortoise(),
        );
        let clock = FixedClock::new(at("2024-01-15T03:00:00Z"));

        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T08:00:00Z")));
        assert_eq!(status(&store, "test-ss").phase, Phase::Active);

        clock.set(at("2024-01-15T08:00:00Z"));
        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-16T00:00:00Z")));
        assert_eq!(status(&store, "test-ss").phase, Phase::Pending);
        assert_eq!(owner_of(&tortoise(&store)), None);

        clock.set(at("2024-01-16T00:00:00Z"));
        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-16T08:00:00Z")));
        assert_eq!(status(&store, "test-ss").phase, Phase::Active);
    }

    #[tokio::test]
    async fn test_overlapping_objects_first_writer_wins() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let mut second = create_test_scheduled_scaling();
        second.metadata.name = Some("second-ss".to_owned());
        second.metadata.uid = Some("ss-uid-2".to_owned());
        store.put_scheduled_scaling(second);

        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;

        let wake = reconcile_object(&store, &clock, TEST_NAMESPACE, "second-ss")
            .await
            .unwrap();
        assert_eq!(wake, Some(at("2024-01-15T12:00:30Z")));

        let loser = status(&store, "second-ss");
        assert_eq!(loser.phase, Phase::Pending);
        assert_eq!(loser.reason.as_deref(), Some("Conflict"));
        assert_eq!(owner_of(&tortoise(&store)).map(|o| o.name).as_deref(), Some("test-ss"));

        // once the winner is gone the loser takes over
        store.mark_deleted(TEST_NAMESPACE, "test-ss");
        pass(&store, &clock).await;
        assert!(store.scheduled_scaling(TEST_NAMESPACE, "test-ss").is_none());

        reconcile_object(&store, &clock, TEST_NAMESPACE, "second-ss")
            .await
            .unwrap();
        assert_eq!(status(&store, "second-ss").phase, Phase::Active);
        assert_eq!(owner_of(&tortoise(&store)).map(|o| o.name).as_deref(), Some("second-ss"));
    }

    #[tokio::test]
    async fn test_missing_target_retries_slowly() {
        let store = FakeStore::default();
        store.put_scheduled_scaling(create_test_scheduled_scaling());
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));

        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T12:05:00Z")));
        let status = status(&store, "test-ss");
        assert_eq!(status.phase, Phase::Pending);
        assert_eq!(status.reason.as_deref(), Some("TargetMissing"));

        // capped at the end of the window
        clock.set(at("2024-01-15T17:58:00Z"));
        assert_eq!(pass(&store, &clock).await, Some(at("2024-01-15T18:00:00Z")));
    }

    #[tokio::test]
    async fn test_target_lost_while_active_fails_until_spec_changes() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;

        store.remove_tortoise(TEST_NAMESPACE, TEST_TORTOISE);
        assert_eq!(pass(&store, &clock).await, None);
        let failed = status(&store, "test-ss");
        assert_eq!(failed.phase, Phase::Failed);
        assert_eq!(failed.reason.as_deref(), Some("TargetLost"));

        // failed objects are left alone until their spec changes
        store.put_tortoise(create_test_tortoise());
        let writes = store.status_writes();
        assert_eq!(pass(&store, &clock).await, None);
        assert_eq!(store.status_writes(), writes);

        store.update_spec(TEST_NAMESPACE, "test-ss", |spec| {
            spec.strategy = scheduled_scaling_with_strategy(replicas_strategy(6)).spec.strategy;
        });
        pass(&store, &clock).await;
        assert_eq!(status(&store, "test-ss").phase, Phase::Active);
        assert_eq!(tortoise(&store).spec.min_replicas, Some(6));
    }

    #[tokio::test]
    async fn test_invalid_spec_fails() {
        let store = setup(
            time_scheduled_scaling("2024-01-15T10:00:00Z", "2024-01-15T10:00:00Z"),
            create_test_tortoise(),
        );
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));

        assert_eq!(pass(&store, &clock).await, None);
        let status = status(&store, "test-ss");
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.reason.as_deref(), Some("InvalidSpec"));
        assert!(status.message.unwrap().contains("must be after startAt"));
        assert_eq!(store.event_reasons(), vec!["InvalidSpec"]);
    }

    #[tokio::test]
    async fn test_invalid_edit_while_active_reverts() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;

        store.update_spec(TEST_NAMESPACE, "test-ss", |spec| {
            spec.schedule.duration = Some("1h".to_owned());
        });
        pass(&store, &clock).await;

        assert_eq!(status(&store, "test-ss").phase, Phase::Failed);
        assert_eq!(owner_of(&tortoise(&store)), None);
        assert_eq!(tortoise(&store).spec, create_test_tortoise().spec);
    }

    #[tokio::test]
    async fn test_deletion_reverts_and_releases_finalizer() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;
        assert!(tortoise(&store).annotations().contains_key(ORIGINAL_SPEC_ANNOTATION));

        store.mark_deleted(TEST_NAMESPACE, "test-ss");
        assert_eq!(pass(&store, &clock).await, None);

        assert!(store.scheduled_scaling(TEST_NAMESPACE, "test-ss").is_none());
        assert!(!tortoise(&store).annotations().contains_key(ORIGINAL_SPEC_ANNOTATION));
        // nothing left to do for a vanished object
        assert_eq!(pass(&store, &clock).await, None);
    }

    #[tokio::test]
    async fn test_revert_conflict_is_surfaced() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));
        pass(&store, &clock).await;

        store.inject_conflicts(3);
        clock.set(at("2024-01-15T18:30:00Z"));
        let err = reconcile_object(&store, &clock, TEST_NAMESPACE, "test-ss")
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(status(&store, "test-ss").phase, Phase::Active);
        let last = store.events().pop().unwrap();
        assert!(last.warning);
        assert_eq!(last.reason, "RevertConflict");

        // the next pass gets through
        pass(&store, &clock).await;
        assert_eq!(status(&store, "test-ss").phase, Phase::Completed);
    }

    #[tokio::test]
    async fn test_transient_errors_propagate() {
        let store = setup(create_test_scheduled_scaling(), create_test_tortoise());
        store.fail_tortoise_reads(true);
        let clock = FixedClock::new(at("2024-01-15T12:00:00Z"));

        let err = reconcile_object(&store, &clock, TEST_NAMESPACE, "test-ss")
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(status(&store, "test-ss").phase, Phase::Pending);
    }
}
