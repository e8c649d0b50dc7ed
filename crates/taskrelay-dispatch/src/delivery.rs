//! Delivery client - sends tasks to the sink with a timeout and bounded, fixed-delay retries.
//!
//! Counters are touched once per `deliver` call (never per retry), so
//! `success_count + error_count` always equals the number of terminal outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use taskrelay_core::TaskDescriptor;
use taskrelay_core::config::SinkConfig;

use crate::stats::{CycleSnapshot, CycleStats};
use crate::transport::{Transport, TransportError, TransportRequest};

type HmacSha256 = Hmac<Sha256>;

/// Timeout/retry/header settings for a [`DeliveryClient`].
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt; `max_retries + 1` attempts in total.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub protocol_version: String,
    pub user_agent: String,
    pub signing_secret: Option<String>,
}

impl DeliveryPolicy {
    pub fn from_config(sink: &SinkConfig) -> Self {
        Self {
            timeout: sink.timeout(),
            max_retries: sink.max_retries,
            retry_delay: sink.retry_delay(),
            protocol_version: sink.protocol_version.clone(),
            user_agent: sink.user_agent.clone(),
            signing_secret: sink.signing_secret.clone(),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from_config(&SinkConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// One send of one task.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAttempt {
    pub attempt_number: u32,
    pub outcome: DeliveryOutcome,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal result of [`DeliveryClient::deliver`].
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub task_id: String,
    pub worker_id: String,
    pub outcome: DeliveryOutcome,
    pub attempts: Vec<DeliveryAttempt>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.outcome == DeliveryOutcome::Success
    }
}

pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
    stats: Arc<CycleStats>,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>, policy: DeliveryPolicy, stats: Arc<CycleStats>) -> Self {
        Self {
            transport,
            policy,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<CycleStats> {
        &self.stats
    }

    /// Deliver with retries. Records exactly one success or error in [`CycleStats`].
    pub async fn deliver(&self, task: &TaskDescriptor) -> DeliveryReport {
        let request = self.build_request(task, &self.stats.snapshot());
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempts = Vec::with_capacity(max_attempts as usize);

        for attempt_number in 1..=max_attempts {
            let attempt = self.attempt(&request, attempt_number).await;
            let succeeded = attempt.outcome == DeliveryOutcome::Success;
            if !succeeded {
                tracing::warn!(
                    "⚠️ Delivery attempt {}/{} failed for task {} ({}): {}",
                    attempt_number,
                    max_attempts,
                    task.id,
                    task.worker_id,
                    attempt.error.as_deref().unwrap_or("unknown error")
                );
            }
            attempts.push(attempt);

            if succeeded {
                self.stats.record_success();
                tracing::debug!(
                    "✅ Task {} delivered to {} for {} (attempt {})",
                    task.id,
                    self.transport.endpoint(),
                    task.worker_id,
                    attempt_number
                );
                return DeliveryReport {
                    task_id: task.id.clone(),
                    worker_id: task.worker_id.clone(),
                    outcome: DeliveryOutcome::Success,
                    attempts,
                };
            }

            if attempt_number < max_attempts && !self.policy.retry_delay.is_zero() {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        self.stats.record_error();
        tracing::error!(
            "❌ Task {} for {} permanently failed after {} attempts",
            task.id,
            task.worker_id,
            max_attempts
        );
        DeliveryReport {
            task_id: task.id.clone(),
            worker_id: task.worker_id.clone(),
            outcome: DeliveryOutcome::PermanentFailure,
            attempts,
        }
    }

    /// Single attempt, no retries and no counter updates. Used for probes and heartbeats.
    pub async fn probe(&self, task: &TaskDescriptor) -> DeliveryAttempt {
        let request = self.build_request(task, &self.stats.snapshot());
        self.attempt(&request, 1).await
    }

    async fn attempt(&self, request: &TransportRequest, attempt_number: u32) -> DeliveryAttempt {
        let started = Instant::now();
        let result = tokio::time::timeout(self.policy.timeout, self.transport.send(request))
            .await
            .unwrap_or(Err(TransportError::Timeout));
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(status) if (200..300).contains(&status) => DeliveryAttempt {
                attempt_number,
                outcome: DeliveryOutcome::Success,
                latency_ms,
                status: Some(status),
                error: None,
            },
            Ok(status) => DeliveryAttempt {
                attempt_number,
                outcome: DeliveryOutcome::TransientFailure,
                latency_ms,
                status: Some(status),
                error: Some(format!("sink responded with status {status}")),
            },
            Err(e) => DeliveryAttempt {
                attempt_number,
                outcome: DeliveryOutcome::TransientFailure,
                latency_ms,
                status: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Serialize the payload once so every retry (and the signature) sees identical bytes.
    pub fn build_request(&self, task: &TaskDescriptor, snapshot: &CycleSnapshot) -> TransportRequest {
        let body = build_payload(task, snapshot).to_string();

        let mut headers = vec![
            ("X-Cycle-Number".to_string(), snapshot.cycle_count.to_string()),
            ("X-Agent-Cycle-Number".to_string(), snapshot.worker_cycle_count.to_string()),
            ("X-System-Uptime".to_string(), snapshot.uptime_secs.to_string()),
            ("X-Protocol-Version".to_string(), self.policy.protocol_version.clone()),
            ("User-Agent".to_string(), self.policy.user_agent.clone()),
        ];
        if let Some(key) = &task.idempotency_key {
            headers.push(("X-Idempotency-Key".to_string(), key.clone()));
        }
        if let Some(secret) = &self.policy.signing_secret {
            headers.push(("X-Signature-256".to_string(), sign(secret, &body)));
        }

        TransportRequest { headers, body }
    }
}

/// Outbound JSON payload for one task.
pub fn build_payload(task: &TaskDescriptor, snapshot: &CycleSnapshot) -> serde_json::Value {
    serde_json::json!({
        "task_type": task.task_type,
        "agent_id": task.worker_id,
        "agent_type": task.worker_category,
        "task_name": task.name,
        "description": task.description,
        "priority": task.priority,
        "workflow_id": task.correlation_id,
        "execution_id": task.id,
        "autonomous": true,
        "continuous_operation": true,
        "timestamp": task.created_at.to_rfc3339(),
        "payload": task.payload,
        "metadata": {
            "system_uptime": snapshot.uptime_secs,
            "total_cycles": snapshot.cycle_count,
            "agent_cycles": snapshot.worker_cycle_count,
            "success_rate": snapshot.success_rate,
        }
    })
}

/// `sha256=<base64 HMAC-SHA256(secret, body)>`
pub fn sign(secret: &str, body: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(body.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("sha256={}", base64::engine::general_purpose::STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskrelay_core::{CycleContext, TaskType, WorkerCategory, WorkerDescriptor};

    /// Answers with a scripted list of results, then repeats the last one.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<u16, TransportError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<u16, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &TransportRequest) -> Result<u16, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }

        fn endpoint(&self) -> &str {
            "scripted"
        }
    }

    fn policy(max_retries: u32) -> DeliveryPolicy {
        DeliveryPolicy {
            timeout: Duration::from_secs(1),
            max_retries,
            retry_delay: Duration::ZERO,
            protocol_version: "1.0".into(),
            user_agent: "taskrelay-test".into(),
            signing_secret: None,
        }
    }

    fn task() -> TaskDescriptor {
        let worker = WorkerDescriptor::new("testing-01", WorkerCategory::Testing, 1);
        TaskDescriptor::new(
            TaskType::Testing,
            &worker,
            "t".into(),
            "d".into(),
            5,
            CycleContext::default(),
        )
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(201)]));
        let stats = Arc::new(CycleStats::new());
        let client = DeliveryClient::new(transport.clone(), policy(5), stats.clone());

        let report = client.deliver(&task()).await;
        assert!(report.is_success());
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(stats.snapshot().success_count, 1);
        assert_eq!(stats.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_counts_one_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(503)]));
        let stats = Arc::new(CycleStats::new());
        let client = DeliveryClient::new(transport.clone(), policy(5), stats.clone());

        let report = client.deliver(&task()).await;
        assert_eq!(report.outcome, DeliveryOutcome::PermanentFailure);
        // Initial attempt + 5 retries
        assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.attempts.len(), 6);
        assert!(report
            .attempts
            .iter()
            .all(|a| a.outcome == DeliveryOutcome::TransientFailure));
        assert_eq!(stats.snapshot().error_count, 1);
        assert_eq!(stats.snapshot().success_count, 0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connection("refused".into())),
            Ok(500),
            Ok(200),
        ]));
        let stats = Arc::new(CycleStats::new());
        let client = DeliveryClient::new(transport.clone(), policy(5), stats.clone());

        let report = client.deliver(&task()).await;
        assert!(report.is_success());
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.attempts[1].status, Some(500));
        assert_eq!(stats.snapshot().success_count, 1);
        assert_eq!(stats.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let mut slow = ScriptedTransport::new(vec![Ok(200)]);
        slow.delay = Duration::from_millis(200);
        let transport = Arc::new(slow);
        let stats = Arc::new(CycleStats::new());
        let mut p = policy(1);
        p.timeout = Duration::from_millis(20);
        let client = DeliveryClient::new(transport.clone(), p, stats.clone());

        let report = client.deliver(&task()).await;
        assert_eq!(report.outcome, DeliveryOutcome::PermanentFailure);
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].error.as_deref(), Some("request timed out"));
        assert_eq!(stats.snapshot().error_count, 1);
    }

    #[tokio::test]
    async fn test_probe_leaves_counters_alone() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(500)]));
        let stats = Arc::new(CycleStats::new());
        let client = DeliveryClient::new(transport.clone(), policy(5), stats.clone());

        let attempt = client.probe(&task()).await;
        assert_eq!(attempt.outcome, DeliveryOutcome::TransientFailure);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().error_count, 0);
    }

    #[test]
    fn test_request_headers_and_payload() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(200)]));
        let stats = Arc::new(CycleStats::new());
        stats.next_cycle();
        stats.next_worker_cycle();
        stats.next_worker_cycle();
        let mut p = policy(0);
        p.signing_secret = Some("s3cret".into());
        let client = DeliveryClient::new(transport, p, stats.clone());

        let t = task().with_idempotency_key(Some("abc".into()));
        let req = client.build_request(&t, &stats.snapshot());
        assert_eq!(req.header("X-Cycle-Number"), Some("1"));
        assert_eq!(req.header("X-Agent-Cycle-Number"), Some("2"));
        assert_eq!(req.header("X-Protocol-Version"), Some("1.0"));
        assert_eq!(req.header("X-Idempotency-Key"), Some("abc"));
        assert_eq!(req.header("X-Signature-256").map(|s| s.to_string()), Some(sign("s3cret", &req.body)));

        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["agent_id"], "testing-01");
        assert_eq!(body["agent_type"], "testing");
        assert_eq!(body["task_type"], "testing");
        assert_eq!(body["autonomous"], true);
        assert_eq!(body["continuous_operation"], true);
        assert_eq!(body["execution_id"], t.id.as_str());
        assert_eq!(body["metadata"]["agent_cycles"], 2);
    }

    #[test]
    fn test_signature_format() {
        let sig = sign("key", "{}");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig, sign("key", "{}"));
        assert_ne!(sig, sign("other", "{}"));
    }
}
