//! Appraisal Engine (C7): per-scope stimulus buffering, appraisal, and
//! the glue between the pure decay (`decay.rs`) and physics
//! (`physics.rs`) layers and the store (spec.md §4.7).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::warn;

use rl_domain::config::AppraisalConfig;
use rl_domain::error::Result;
use rl_domain::tool::Message;
use rl_providers::{ChatRequest, LlmProvider};
use rl_store::types::{AppraisalData, EmotionInstance, EmotionState, StimulusHistory};
use rl_store::StoreGateway;

use crate::decay::{apply_decay, DecayContext};
use crate::physics::{calculate_intensity_change, PhysicsContext, SocialContext};
use crate::profile::{profile_for, OccProfile};

/// One buffered stimulus awaiting the next flush (spec.md §4.7 "pending
/// stimulus buffer").
#[derive(Debug, Clone)]
pub struct StimulusEntry {
    pub stimulus_type: String,
    pub payload: String,
    pub context: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct AppraisalJudgment {
    #[serde(default)]
    resulting_emotions: Vec<ResultingEmotion>,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ResultingEmotion {
    #[serde(rename = "type")]
    emotion_type: String,
    intensity: f64,
}

struct ManagerState {
    active_map: HashMap<String, EmotionInstance>,
    last_decay_time: DateTime<Utc>,
    last_major_change_time: DateTime<Utc>,
    pending: VecDeque<StimulusEntry>,
    recent_stimuli: VecDeque<StimulusHistory>,
}

/// Holds one scope's (a session, or the daemon-global `None` scope)
/// affect state and mediates every read/write of it.
pub struct EmotionManager {
    session_id: Option<String>,
    store: Arc<StoreGateway>,
    provider: Option<Arc<dyn LlmProvider>>,
    profile: OccProfile,
    max_batch_size: usize,
    recent_stimuli_max: usize,
    inner: Mutex<ManagerState>,
}

impl EmotionManager {
    /// Loads the most recent `EmotionState` and the recent-stimuli window
    /// for `session_id` (spec.md §4.7 "Initialize").
    pub fn new(
        session_id: Option<String>,
        store: Arc<StoreGateway>,
        provider: Option<Arc<dyn LlmProvider>>,
        profile: OccProfile,
        config: &AppraisalConfig,
    ) -> Self {
        let now = Utc::now();
        let (active_map, last_decay_time) =
            match store.load_latest_emotion_state(session_id.as_deref()) {
                Some(state) => (
                    state.appraisal_data.active_map,
                    state.appraisal_data.last_decay_time,
                ),
                None => (HashMap::new(), now),
            };
        let since = now - ChronoDuration::minutes(config.recent_stimuli_window_mins);
        let recent = store.load_recent_stimulus_history(
            session_id.as_deref(),
            since,
            config.recent_stimuli_max,
        );
        Self {
            session_id,
            store,
            provider,
            profile,
            max_batch_size: config.max_batch_size,
            recent_stimuli_max: config.recent_stimuli_max,
            inner: Mutex::new(ManagerState {
                active_map,
                last_decay_time,
                last_major_change_time: now,
                pending: VecDeque::new(),
                recent_stimuli: VecDeque::from(recent),
            }),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// `bufferStimulus` (spec.md §4.7).
    pub fn buffer_stimulus(&self, entry: StimulusEntry) {
        self.inner.lock().pending.push_back(entry);
    }

    pub fn active_map(&self) -> HashMap<String, EmotionInstance> {
        self.inner.lock().active_map.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Drains up to `MAX_BATCH_SIZE` pending stimuli, appraises them, and
    /// persists a new `EmotionState` if the active map materially
    /// changed (spec.md §4.7 "Flush").
    pub async fn flush(
        &self,
        decay_ctx: &DecayContext,
        social_ctx: SocialContext,
    ) -> Result<Option<EmotionState>> {
        let drained: Vec<StimulusEntry> = {
            let mut inner = self.inner.lock();
            let n = inner.pending.len().min(self.max_batch_size);
            inner.pending.drain(..n).collect()
        };
        if drained.is_empty() {
            return Ok(None);
        }

        let stimulus_text = if drained.len() == 1 {
            drained[0].payload.clone()
        } else {
            drained
                .iter()
                .map(|e| e.payload.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };

        let decayed_map = {
            let mut inner = self.inner.lock();
            let elapsed = ((Utc::now() - inner.last_decay_time).num_seconds() as f64 / 60.0)
                .max(0.0);
            let (new_map, _) = apply_decay(&inner.active_map, elapsed, decay_ctx);
            inner.active_map = new_map.clone();
            inner.last_decay_time = Utc::now();
            new_map
        };

        let judgment = self.appraise(&decayed_map, &stimulus_text).await;
        let now = Utc::now();

        let mut changed = false;
        {
            let mut inner = self.inner.lock();
            for emotion in &judgment.resulting_emotions {
                if emotion.intensity <= 0.0 || emotion.emotion_type == "neutral" {
                    continue;
                }
                let recent: Vec<StimulusHistory> =
                    inner.recent_stimuli.iter().cloned().collect();
                let minutes_since_major =
                    ((now - inner.last_major_change_time).num_seconds() as f64 / 60.0).max(0.0);
                let current = inner.active_map.get(&emotion.emotion_type).map(|e| e.intensity);
                let physics_ctx = PhysicsContext {
                    recent_stimuli: &recent,
                    minutes_since_major_change: minutes_since_major,
                    social_context: social_ctx,
                    current_intensity: current,
                };
                let result =
                    calculate_intensity_change(&emotion.emotion_type, emotion.intensity, &physics_ctx);
                if result > 1.0 {
                    inner.active_map.insert(
                        emotion.emotion_type.clone(),
                        EmotionInstance {
                            emotion_type: emotion.emotion_type.clone(),
                            intensity: result,
                            last_updated: now,
                        },
                    );
                    changed = true;
                } else if inner.active_map.remove(&emotion.emotion_type).is_some() {
                    changed = true;
                }
            }
            if changed {
                inner.last_major_change_time = now;
            }
        }

        let valence = self.derive_valence(&judgment);
        let intensity = judgment
            .resulting_emotions
            .iter()
            .map(|e| e.intensity)
            .fold(0.0_f64, f64::max);
        for entry in &drained {
            let row = StimulusHistory {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: self.session_id.clone(),
                timestamp: Utc::now(),
                stimulus_type: entry.stimulus_type.clone(),
                valence,
                intensity,
                context: entry.context.clone(),
            };
            let persisted = self.store.insert_stimulus_history(row)?;
            let mut inner = self.inner.lock();
            inner.recent_stimuli.push_back(persisted);
            while inner.recent_stimuli.len() > self.recent_stimuli_max {
                inner.recent_stimuli.pop_front();
            }
        }

        if !changed {
            return Ok(None);
        }
        Ok(Some(self.snapshot_and_persist(now)?))
    }

    /// Background-tick decay with no stimulus (spec.md §4.8 "A background
    /// tick invokes decay periodically per active manager; flushes
    /// persist after a material change only.").
    pub fn decay_only(&self, ctx: &DecayContext) -> Result<()> {
        let (total_activity, now) = {
            let mut inner = self.inner.lock();
            let elapsed =
                ((Utc::now() - inner.last_decay_time).num_seconds() as f64 / 60.0).max(0.0);
            if elapsed <= 0.0 {
                return Ok(());
            }
            let (new_map, total_activity) = apply_decay(&inner.active_map, elapsed, ctx);
            inner.active_map = new_map;
            inner.last_decay_time = Utc::now();
            (total_activity, Utc::now())
        };
        if total_activity > 0.0 {
            self.snapshot_and_persist(now)?;
        }
        Ok(())
    }

    fn derive_valence(&self, judgment: &AppraisalJudgment) -> f64 {
        let sum: f64 = judgment
            .resulting_emotions
            .iter()
            .map(|e| (e.intensity / 10.0) * profile_for(&e.emotion_type).valence_sign)
            .sum();
        sum.clamp(-10.0, 10.0)
    }

    fn snapshot_and_persist(&self, now: DateTime<Utc>) -> Result<EmotionState> {
        let inner = self.inner.lock();
        let mut sorted: Vec<&EmotionInstance> = inner.active_map.values().collect();
        sorted.sort_by(|a, b| {
            b.intensity
                .partial_cmp(&a.intensity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let primary = sorted.first().cloned();
        let secondary = sorted.get(1).cloned();
        let state = EmotionState {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            primary_type: primary.map(|e| e.emotion_type.clone()),
            primary_intensity: primary.map(|e| e.intensity).unwrap_or(0.0),
            secondary_type: secondary.map(|e| e.emotion_type.clone()),
            secondary_intensity: secondary.map(|e| e.intensity).unwrap_or(0.0),
            overall_intensity: primary.map(|e| e.intensity).unwrap_or(0.0),
            appraisal_data: AppraisalData {
                active_map: inner.active_map.clone(),
                last_decay_time: inner.last_decay_time,
            },
            trigger_data: None,
            last_update: now,
        };
        drop(inner);
        self.store.insert_emotion_state(state)
    }

    async fn appraise(
        &self,
        active_map: &HashMap<String, EmotionInstance>,
        stimulus: &str,
    ) -> AppraisalJudgment {
        let Some(provider) = &self.provider else {
            return self.heuristic_appraisal(stimulus);
        };
        let req = ChatRequest {
            messages: vec![
                Message::system(
                    "You are an affect-appraisal module for an OCC-style emotion model. \
                     Respond with strict JSON only: \
                     {\"resulting_emotions\":[{\"type\":string,\"intensity\":0-100}],\"reasoning\":string}. \
                     Omit emotion types that are not warranted by the stimulus.",
                ),
                Message::user(self.build_prompt(active_map, stimulus)),
            ],
            json_mode: true,
            ..Default::default()
        };
        match provider.chat(req).await {
            Ok(resp) => match serde_json::from_str::<AppraisalJudgment>(&resp.content) {
                Ok(j) => j,
                Err(err) => {
                    warn!(error = %err, "appraisal response was not valid JSON, using heuristic fallback");
                    self.heuristic_appraisal(stimulus)
                }
            },
            Err(err) => {
                warn!(error = %err, "appraisal provider call failed, using heuristic fallback");
                self.heuristic_appraisal(stimulus)
            }
        }
    }

    fn build_prompt(&self, active_map: &HashMap<String, EmotionInstance>, stimulus: &str) -> String {
        let state_json = serde_json::to_string(active_map).unwrap_or_default();
        let profile_json = serde_json::to_string(&self.profile).unwrap_or_default();
        format!(
            "Current active emotions: {state_json}\n\
             OCC profile (goals/standards/attitudes): {profile_json}\n\
             New stimulus:\n{stimulus}"
        )
    }

    /// Coarse keyword heuristic used when no provider is configured, so
    /// the manager still produces *something* rather than stalling.
    fn heuristic_appraisal(&self, stimulus: &str) -> AppraisalJudgment {
        let lower = stimulus.to_lowercase();
        let mut resulting_emotions = Vec::new();
        if lower.contains("thank") || lower.contains("great") || lower.contains("love") {
            resulting_emotions.push(ResultingEmotion {
                emotion_type: "joy".to_string(),
                intensity: 40.0,
            });
        }
        if lower.contains("sorry") || lower.contains("fail") || lower.contains("error") {
            resulting_emotions.push(ResultingEmotion {
                emotion_type: "distress".to_string(),
                intensity: 35.0,
            });
        }
        if lower.contains("angry") || lower.contains("frustrat") {
            resulting_emotions.push(ResultingEmotion {
                emotion_type: "anger".to_string(),
                intensity: 45.0,
            });
        }
        AppraisalJudgment {
            resulting_emotions,
            reasoning: "heuristic fallback (no provider configured)".to_string(),
        }
    }
}

/// Registry of `EmotionManager`s keyed by scope (spec.md §4.7: "Per
/// session (session_id may be null), a manager holds ..."). One registry
/// per daemon.
pub struct AppraisalRegistry {
    store: Arc<StoreGateway>,
    provider: Option<Arc<dyn LlmProvider>>,
    profile: OccProfile,
    config: AppraisalConfig,
    managers: Mutex<HashMap<Option<String>, Arc<EmotionManager>>>,
}

impl AppraisalRegistry {
    pub fn new(
        store: Arc<StoreGateway>,
        provider: Option<Arc<dyn LlmProvider>>,
        profile: OccProfile,
        config: AppraisalConfig,
    ) -> Self {
        Self {
            store,
            provider,
            profile,
            config,
            managers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, session_id: Option<String>) -> Arc<EmotionManager> {
        let mut managers = self.managers.lock();
        managers
            .entry(session_id.clone())
            .or_insert_with(|| {
                Arc::new(EmotionManager::new(
                    session_id,
                    self.store.clone(),
                    self.provider.clone(),
                    self.profile.clone(),
                    &self.config,
                ))
            })
            .clone()
    }

    /// Background tick across every manager created so far (spec.md §5
    /// "the consolidation scheduler polls ... fixed tick"; the decay tick
    /// is this engine's analogue).
    pub fn tick_decay(&self, ctx: &DecayContext) {
        let managers: Vec<Arc<EmotionManager>> = self.managers.lock().values().cloned().collect();
        for manager in managers {
            if let Err(err) = manager.decay_only(ctx) {
                warn!(error = %err, session_id = ?manager.session_id(), "decay tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> Arc<StoreGateway> {
        let dir = tempdir().unwrap();
        Arc::new(StoreGateway::open(dir.path()).unwrap())
    }

    fn ctx() -> DecayContext {
        DecayContext {
            is_user_present: true,
            is_user_engaged: true,
            recent_emotional_activity: 0.3,
            environmental_stress: 0.0,
            social_support: 0.4,
            time_of_day: crate::decay::TimeOfDay::Afternoon,
            personality_stability: 0.5,
        }
    }

    #[tokio::test]
    async fn flush_with_no_provider_uses_heuristic_and_persists_on_change() {
        let manager = EmotionManager::new(
            None,
            store(),
            None,
            OccProfile::default(),
            &AppraisalConfig::default(),
        );
        manager.buffer_stimulus(StimulusEntry {
            stimulus_type: "message".to_string(),
            payload: "thank you so much, that was great!".to_string(),
            context: serde_json::json!({}),
        });
        let social = SocialContext {
            is_user_present: true,
            is_user_engaged: true,
        };
        let result = manager.flush(&ctx(), social).await.unwrap();
        assert!(result.is_some());
        assert!(manager.active_map().contains_key("joy"));
    }

    #[tokio::test]
    async fn flush_with_empty_buffer_is_a_no_op() {
        let manager = EmotionManager::new(
            None,
            store(),
            None,
            OccProfile::default(),
            &AppraisalConfig::default(),
        );
        let social = SocialContext {
            is_user_present: false,
            is_user_engaged: false,
        };
        let result = manager.flush(&ctx(), social).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decay_only_is_a_no_op_within_the_same_instant() {
        let manager = EmotionManager::new(
            None,
            store(),
            None,
            OccProfile::default(),
            &AppraisalConfig::default(),
        );
        manager.decay_only(&ctx()).unwrap();
    }
}
