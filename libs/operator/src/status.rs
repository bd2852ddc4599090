use crate::controller::Context;
use crate::crd::{CONFIG_RESOURCE_NAME, Console};
use crate::error::{Error, Result};

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use serde_json::json;
use tracing::{debug, trace};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

static CONSOLE_STATUS_FIELD_MANAGER: &str = "consoles.consolop.rs";

/// Derives the `<prefix>Progressing`/`<prefix>Degraded` condition pair from
/// one logical check: an error means Degraded, a non-empty not-ready message
/// means Progressing, and neither resets the pair to its neutral state with
/// an empty reason.
pub fn progressing_or_degraded(
    prefix: &str,
    reason: &str,
    err: Option<&Error>,
    not_ready: Option<&str>,
) -> [Condition; 2] {
    let now = Time(Utc::now());
    let condition = |suffix: &str, status: &str, reason: &str, message: String| Condition {
        type_: format!("{prefix}{suffix}"),
        status: status.to_string(),
        reason: reason.to_string(),
        message,
        last_transition_time: now.clone(),
        observed_generation: None,
    };

    match (err, not_ready) {
        (Some(err), _) => [
            condition("Progressing", CONDITION_FALSE, reason, String::new()),
            condition("Degraded", CONDITION_TRUE, reason, err.to_string()),
        ],
        (None, Some(message)) => [
            condition("Progressing", CONDITION_TRUE, reason, message.to_string()),
            condition("Degraded", CONDITION_FALSE, reason, String::new()),
        ],
        (None, None) => [
            condition("Progressing", CONDITION_FALSE, "", String::new()),
            condition("Degraded", CONDITION_FALSE, "", String::new()),
        ],
    }
}

/// Merges updated conditions into the current set by condition type. Types not
/// mentioned in `updates` are left untouched, and `lastTransitionTime` only
/// moves when the status actually changes, so rewriting an unchanged condition
/// is a no-op.
pub fn merge_conditions(current: Option<&Vec<Condition>>, updates: Vec<Condition>) -> Vec<Condition> {
    let mut merged = current.cloned().unwrap_or_default();
    for update in updates {
        match merged.iter_mut().find(|c| c.type_ == update.type_) {
            Some(existing) => {
                if existing.status == update.status
                    && existing.reason == update.reason
                    && existing.message == update.message
                    && existing.observed_generation == update.observed_generation
                {
                    continue;
                }
                let last_transition_time = if existing.status == update.status {
                    existing.last_transition_time.clone()
                } else {
                    update.last_transition_time.clone()
                };
                *existing = Condition {
                    last_transition_time,
                    ..update
                };
            }
            None => merged.push(update),
        }
    }
    merged
}

/// Accumulates condition updates proposed during one reconciliation pass and
/// flushes them to the Console status in a single apply at the end of the
/// pass. Created empty at pass start, consumed exactly once by
/// [`flush_and_return`].
///
/// [`flush_and_return`]: StatusHandler::flush_and_return
#[derive(Default)]
pub struct StatusHandler {
    conditions: Vec<Condition>,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conditions(&mut self, conditions: [Condition; 2]) {
        self.conditions.extend(conditions);
    }

    /// Resets the pair owned by `prefix` to its neutral state; used by every
    /// branch that skips the check the pair reports on.
    pub fn reset_conditions(&mut self, prefix: &str) {
        self.add_conditions(progressing_or_degraded(prefix, "", None, None));
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Writes all accumulated conditions in one status update and returns
    /// `outcome`, unless the write itself fails: a failed status write must
    /// not be masked by a successful sync, nor the other way around.
    pub async fn flush_and_return(
        self,
        ctx: &Context,
        outcome: Result<Action>,
    ) -> Result<Action> {
        if self.conditions.is_empty() {
            return outcome;
        }

        let Some(console) = ctx
            .stores
            .console()
            .get(&ObjectRef::new(CONFIG_RESOURCE_NAME))
        else {
            return Err(Error::MissingObject("console"));
        };

        let mut updates = self.conditions;
        for condition in &mut updates {
            condition.observed_generation = console.metadata.generation;
        }
        let conditions = merge_conditions(
            console.status.as_ref().and_then(|s| s.conditions.as_ref()),
            updates,
        );

        let status_patch = Patch::Apply(json!({
            "apiVersion": "consolop.rs/v1",
            "kind": "Console",
            "status": { "conditions": conditions }
        }));
        debug!(msg = "updating Console status conditions");
        trace!(msg = format!("status patch {status_patch:?}"));
        let patch = PatchParams::apply(CONSOLE_STATUS_FIELD_MANAGER).force();
        let console_api = Api::<Console>::all(ctx.client.clone());
        match console_api
            .patch_status(CONFIG_RESOURCE_NAME, &patch, &status_patch)
            .await
        {
            Ok(_) => outcome,
            Err(e) => {
                ctx.metrics.status_update_errors_inc();
                Err(Error::KubeError(
                    "failed to patch Console/status".to_string(),
                    Box::new(e),
                ))
            }
        }
    }
}
