//! Campaign Runner - Owns the dispatcher workers
//!
//! At most one worker per campaign, tracked by a registry of cancellation
//! tokens. A semaphore caps how many campaigns send at once; extra campaigns
//! wait in `queued`. Worker tokens are children of one shutdown token, so a
//! user pause and a process shutdown can be told apart.

use crate::dispatcher::CampaignDispatcher;
use crate::error::CampaignError;
use bulkmail_common::types::{CampaignId, UserId};
use bulkmail_storage::models::{Campaign, CampaignStatus};
use bulkmail_storage::repository::CampaignRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

struct Worker {
    id: Uuid,
    cancel: CancellationToken,
}

/// Campaign runner
#[derive(Clone)]
pub struct CampaignRunner {
    dispatcher: Arc<CampaignDispatcher>,
    campaigns: Arc<dyn CampaignRepository>,
    workers: Arc<Mutex<HashMap<CampaignId, Worker>>>,
    campaign_slots: Arc<Semaphore>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl CampaignRunner {
    pub fn new(
        dispatcher: CampaignDispatcher,
        campaigns: Arc<dyn CampaignRepository>,
        max_concurrent_campaigns: usize,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            dispatcher: Arc::new(dispatcher.with_shutdown(shutdown.clone())),
            campaigns,
            workers: Arc::new(Mutex::new(HashMap::new())),
            campaign_slots: Arc::new(Semaphore::new(max_concurrent_campaigns.max(1))),
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Queue a draft or paused campaign and launch its worker
    pub async fn start(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_for_user(user_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;

        if self.is_running(campaign_id).await {
            return Err(CampaignError::AlreadyRunning);
        }

        let Some(queued) = self
            .campaigns
            .transition(campaign_id, &CampaignStatus::STARTABLE, CampaignStatus::Queued)
            .await?
        else {
            let current = self
                .campaigns
                .get(campaign_id)
                .await?
                .map(|c| c.status)
                .unwrap_or(campaign.status);
            return match current.parse::<CampaignStatus>() {
                Ok(status) if CampaignStatus::ACTIVE.contains(&status) => {
                    Err(CampaignError::AlreadyRunning)
                }
                _ => Err(CampaignError::InvalidState {
                    action: "started",
                    status: current,
                }),
            };
        };

        info!(campaign_id = %campaign_id, "Campaign {} queued", campaign_id);
        self.spawn(campaign_id, false).await;
        Ok(queued)
    }

    /// Ask the campaign's worker to stop at its next checkpoint
    pub async fn pause(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self
            .campaigns
            .get_for_user(user_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound(campaign_id))?;

        if let Some(worker) = self.workers.lock().await.get(&campaign_id) {
            worker.cancel.cancel();
            info!(campaign_id = %campaign_id, "Pause requested for campaign {}", campaign_id);
            return Ok(campaign);
        }

        // No live worker; an active status here is left over from a crash
        match self
            .campaigns
            .transition(campaign_id, &CampaignStatus::ACTIVE, CampaignStatus::Paused)
            .await?
        {
            Some(paused) => Ok(paused),
            None => Err(CampaignError::InvalidState {
                action: "paused",
                status: campaign.status,
            }),
        }
    }

    /// Re-dispatch campaigns left `queued` or `sending` by a previous process
    pub async fn recover(&self) -> Result<usize, CampaignError> {
        let campaigns = self
            .campaigns
            .list_by_status(&CampaignStatus::ACTIVE)
            .await?;

        let count = campaigns.len();
        for campaign in campaigns {
            info!(campaign_id = %campaign.id, status = %campaign.status, "Recovering campaign {}", campaign.id);
            self.spawn(campaign.id, true).await;
        }
        Ok(count)
    }

    pub async fn is_running(&self, campaign_id: CampaignId) -> bool {
        self.workers.lock().await.contains_key(&campaign_id)
    }

    /// Stop every worker at its next checkpoint and wait for them to exit.
    /// Their campaigns stay `queued` or `sending` for `recover` on next boot.
    pub async fn shutdown(&self) {
        let running = self.workers.lock().await.len();
        if running > 0 {
            info!("Stopping {} campaign workers", running);
        }

        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    async fn spawn(&self, campaign_id: CampaignId, recovering: bool) {
        let worker_id = Uuid::now_v7();
        let cancel = self.shutdown.child_token();

        {
            let mut workers = self.workers.lock().await;
            if workers.contains_key(&campaign_id) {
                warn!(campaign_id = %campaign_id, "Worker already registered, not spawning another");
                return;
            }
            workers.insert(
                campaign_id,
                Worker {
                    id: worker_id,
                    cancel: cancel.clone(),
                },
            );
        }

        let runner = self.clone();
        self.tasks.spawn(async move {
            runner.work(campaign_id, worker_id, cancel, recovering).await;
        });
    }

    async fn work(
        &self,
        campaign_id: CampaignId,
        worker_id: Uuid,
        cancel: CancellationToken,
        recovering: bool,
    ) {
        let permit = tokio::select! {
            permit = self.campaign_slots.clone().acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        };

        match permit {
            Some(_permit) => {
                let result = if recovering {
                    self.dispatcher.resume(campaign_id, cancel).await
                } else {
                    self.dispatcher.run(campaign_id, cancel).await
                };

                match result {
                    Ok(summary) => info!(
                        campaign_id = %campaign_id,
                        attempted = summary.attempted,
                        sent = summary.sent,
                        failed = summary.failed,
                        status = %summary.final_status,
                        "Campaign worker finished"
                    ),
                    Err(e) => error!(campaign_id = %campaign_id, error = %e, "Campaign worker failed"),
                }
            }
            None if self.shutdown.is_cancelled() => {
                info!(campaign_id = %campaign_id, "Campaign {} left for recovery", campaign_id);
            }
            None => {
                // Paused while waiting for a slot
                if let Err(e) = self
                    .campaigns
                    .transition(campaign_id, &CampaignStatus::ACTIVE, CampaignStatus::Paused)
                    .await
                {
                    error!(campaign_id = %campaign_id, error = %e, "Failed to pause waiting campaign");
                }
                info!(campaign_id = %campaign_id, "Campaign {} paused before sending", campaign_id);
            }
        }

        let mut workers = self.workers.lock().await;
        if workers.get(&campaign_id).map(|w| w.id) == Some(worker_id) {
            workers.remove(&campaign_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::{harness, ScriptedTransport};
    use crate::pacing::Pacer;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn wait_for_status(
        campaigns: &Arc<dyn CampaignRepository>,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Campaign {
        for _ in 0..200 {
            let campaign = campaigns.get(id).await.unwrap().unwrap();
            if campaign.status_enum() == Some(status) {
                return campaign;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("campaign never reached {}", status);
    }

    async fn wait_until_settled(campaigns: &Arc<dyn CampaignRepository>, id: CampaignId) -> Campaign {
        for _ in 0..200 {
            let campaign = campaigns.get(id).await.unwrap().unwrap();
            match campaign.status_enum() {
                Some(status) if CampaignStatus::ACTIVE.contains(&status) => {}
                _ => return campaign,
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("campaign {} never settled", id);
    }

    async fn wait_for_sent(campaigns: &Arc<dyn CampaignRepository>, id: CampaignId, sent: i32) {
        for _ in 0..200 {
            if campaigns.get(id).await.unwrap().unwrap().sent_count >= sent {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("campaign {} never sent {}", id, sent);
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com", "b@x.com"]).await;
        let runner = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 2);

        let queued = runner.start(h.user_id, campaign.id).await.unwrap();
        assert_eq!(queued.status, "queued");

        let done = wait_for_status(&h.repos.campaigns, campaign.id, CampaignStatus::Completed).await;
        assert_eq!(done.sent_count, 2);
    }

    #[tokio::test]
    async fn test_completed_campaign_cannot_restart() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com"]).await;
        let runner = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 1);

        runner.start(h.user_id, campaign.id).await.unwrap();
        wait_for_status(&h.repos.campaigns, campaign.id, CampaignStatus::Completed).await;
        for _ in 0..200 {
            if !runner.is_running(campaign.id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = runner.start(h.user_id, campaign.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_other_users_cannot_start() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com"]).await;
        let runner = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 1);

        let err = runner.start(Uuid::now_v7(), campaign.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pause_orphaned_sending_campaign() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com"]).await;
        h.queue(campaign.id).await;
        h.repos
            .campaigns
            .transition(campaign.id, &[CampaignStatus::Queued], CampaignStatus::Sending)
            .await
            .unwrap();

        let runner = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 1);
        let paused = runner.pause(h.user_id, campaign.id).await.unwrap();
        assert_eq!(paused.status, "paused");
    }

    #[tokio::test]
    async fn test_recover_resumes_sending_campaigns() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com", "b@x.com"]).await;
        h.queue(campaign.id).await;
        h.repos
            .campaigns
            .transition(campaign.id, &[CampaignStatus::Queued], CampaignStatus::Sending)
            .await
            .unwrap();

        let runner = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 1);
        assert_eq!(runner.recover().await.unwrap(), 1);

        let done = wait_for_status(&h.repos.campaigns, campaign.id, CampaignStatus::Completed).await;
        assert_eq!(done.sent_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_campaigns_share_quota() {
        let h = harness(ScriptedTransport::slow(Duration::from_millis(50))).await;
        h.use_quota(9).await;
        let first = h.campaign(&["a@x.com"]).await;
        let second = h.campaign(&["b@x.com"]).await;
        let runner = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 4);

        runner.start(h.user_id, first.id).await.unwrap();
        runner.start(h.user_id, second.id).await.unwrap();

        let mut statuses = vec![
            wait_until_settled(&h.repos.campaigns, first.id).await.status,
            wait_until_settled(&h.repos.campaigns, second.id).await.status,
        ];
        statuses.sort();
        assert_eq!(statuses, vec!["completed", "paused"]);
        assert_eq!(h.transport.sent.lock().await.len(), 1);

        let usage = h.quota.usage(h.user_id).await.unwrap();
        assert_eq!(usage.emails_today, 10);
        assert_eq!(usage.daily_limit, 10);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_campaign_for_recovery() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com", "b@x.com", "c@x.com"]).await;
        let slow = h.dispatcher_with(h.repos.email_logs.clone(), Pacer::new(60_000, 60_000));
        let runner = CampaignRunner::new(slow, h.repos.campaigns.clone(), 1);

        runner.start(h.user_id, campaign.id).await.unwrap();
        wait_for_sent(&h.repos.campaigns, campaign.id, 1).await;
        runner.shutdown().await;

        let stored = h.repos.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "sending");
        assert_eq!(stored.sent_count, 1);
        assert!(!runner.is_running(campaign.id).await);

        let next_boot = CampaignRunner::new(h.dispatcher.clone(), h.repos.campaigns.clone(), 1);
        assert_eq!(next_boot.recover().await.unwrap(), 1);
        let done = wait_for_status(&h.repos.campaigns, campaign.id, CampaignStatus::Completed).await;
        assert_eq!(done.sent_count, 3);
    }

    #[tokio::test]
    async fn test_user_pause_stops_live_worker() {
        let h = harness(ScriptedTransport::default()).await;
        let campaign = h.campaign(&["a@x.com", "b@x.com"]).await;
        let slow = h.dispatcher_with(h.repos.email_logs.clone(), Pacer::new(60_000, 60_000));
        let runner = CampaignRunner::new(slow, h.repos.campaigns.clone(), 1);

        runner.start(h.user_id, campaign.id).await.unwrap();
        wait_for_sent(&h.repos.campaigns, campaign.id, 1).await;
        runner.pause(h.user_id, campaign.id).await.unwrap();

        let paused = wait_for_status(&h.repos.campaigns, campaign.id, CampaignStatus::Paused).await;
        assert_eq!(paused.sent_count, 1);
        assert_eq!(h.quota.usage(h.user_id).await.unwrap().emails_today, 1);
    }
}
