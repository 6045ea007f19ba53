//! One handler per non-terminal stage.
//!
//! Handlers mutate a working copy of the item and queue action log entries
//! on the [`StageContext`]; the runner commits both together.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::actors::{BidOutcome, BidStatus, DeliveryKind};
use crate::generation::GenerationSpec;
use crate::metrics;
use crate::notify::Notification;
use crate::originality::{Decision, ExhaustedPolicy};
use crate::registry::{
    action_kinds, ActionOutcome, ItemDetail, ItemFilter, ItemStatus, MessageDirection,
    MessageIntent, MessageOrigin, NewMessage, WorkItem,
};
use crate::verification::CheckReport;

use super::runner::{Shared, SlotGrant, StageContext, Step};
use super::scoring::{gate, score_item};
use super::types::OrchestratorError;

/// What a pass over the customer conversation found.
#[derive(Debug, Default)]
pub(super) struct ConversationPass {
    pub new_messages: usize,
    pub approved: bool,
}

fn detail_of(item: &WorkItem) -> Result<&ItemDetail, OrchestratorError> {
    item.detail
        .as_ref()
        .ok_or(OrchestratorError::MissingData("detail"))
}

impl Shared {
    /// Discovered -> Scored: fetch the detail, gate, score.
    pub(super) async fn score(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let limit = self.config.max_concurrent_items;
        match self
            .item_slots
            .try_reserve(&item.id, limit, || self.active_items())?
        {
            SlotGrant::Granted(reservation) => ctx.reservation = Some(reservation),
            SlotGrant::Full(in_use) => {
                return Ok(Step::Stay(format!(
                    "{} of {} active slots in use",
                    in_use, limit
                )));
            }
        }

        let detail = self
            .retry
            .run("fetch_detail", || self.site.fetch_detail(&item.external_ref))
            .await?;
        ctx.log(
            item,
            action_kinds::FETCH_DETAIL,
            ActionOutcome::Succeeded,
            &detail.work_type,
        );
        if !detail.title.trim().is_empty() {
            item.title = detail.title.clone();
        }
        item.detail = Some(detail.clone());

        if let Some(reason) = gate(&detail, &self.config.banned_work_types) {
            return Ok(Step::Reject(reason));
        }

        let result = score_item(self.reasoning.as_ref(), &self.retry, &detail, &mut ctx.tally).await?;
        item.score = Some(result.score);
        item.score_reason = Some(result.reason.clone());
        ctx.log(
            item,
            action_kinds::SCORE,
            ActionOutcome::Succeeded,
            format!("score {} ({})", result.score, result.reason),
        );
        debug!(item_id = %item.id, score = result.score, can_do = result.can_do, "Item scored");

        if !result.can_do {
            return Ok(Step::Reject(format!("cannot be done: {}", result.reason)));
        }
        if result.score < self.config.min_score {
            return Ok(Step::Reject(format!(
                "score {} below minimum {}",
                result.score, self.config.min_score
            )));
        }
        Ok(Step::Advance(ItemStatus::Scored))
    }

    /// Scored -> BidPlaced.
    pub(super) async fn bid(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let detail = detail_of(item)?.clone();
        let quote = {
            let mut rng = rand::rng();
            self.pricing.quote(&detail, &mut rng)
        };
        if !self.pricing.within_bounds(quote.price) {
            return Ok(Step::Reject(format!(
                "price {} outside [{}, {}]",
                quote.price,
                self.pricing.config().min_price,
                self.pricing.config().max_price
            )));
        }

        let comment = self.pricing.bid_comment(&detail, quote.price);
        let outcome = self
            .retry
            .run("place_bid", || {
                self.site.place_bid(&item.external_ref, quote.price, &comment)
            })
            .await?;

        match outcome {
            BidOutcome::Placed => {
                item.bid_price = Some(quote.price);
                metrics::BIDS_PLACED.inc();
                ctx.log(
                    item,
                    action_kinds::PLACE_BID,
                    ActionOutcome::Succeeded,
                    format!("{} ({})", quote.price, quote.method.as_str()),
                );
                info!(item_id = %item.id, price = quote.price, method = quote.method.as_str(), "Bid placed");
                Ok(Step::Advance(ItemStatus::BidPlaced))
            }
            BidOutcome::AlreadyTaken => self.bid_refused(item, ctx, "already taken".to_string()),
            BidOutcome::Closed => self.bid_refused(item, ctx, "closed".to_string()),
            BidOutcome::Rejected(why) => {
                self.bid_refused(item, ctx, format!("bid rejected: {}", why))
            }
        }
    }

    fn bid_refused(
        &self,
        item: &WorkItem,
        ctx: &mut StageContext,
        reason: String,
    ) -> Result<Step, OrchestratorError> {
        ctx.log(item, action_kinds::PLACE_BID, ActionOutcome::Rejected, &reason);
        Ok(Step::Reject(reason))
    }

    /// BidPlaced -> Accepted once the customer picks us.
    pub(super) async fn poll_bid(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let status = self
            .retry
            .run("bid_status", || self.site.bid_status(&item.external_ref))
            .await?;

        match status {
            BidStatus::Accepted { final_price } => {
                item.final_price = final_price.or(item.bid_price);
                ctx.log(
                    item,
                    action_kinds::BID_ACCEPTED,
                    ActionOutcome::Succeeded,
                    format!("final price {}", item.final_price.unwrap_or(0)),
                );
                Ok(Step::Advance(ItemStatus::Accepted))
            }
            BidStatus::Declined => {
                ctx.log(item, action_kinds::BID_STATUS, ActionOutcome::Rejected, "declined");
                Ok(Step::Reject("bid declined".to_string()))
            }
            BidStatus::Pending => {
                item.parked_until = Some(
                    Utc::now() + chrono::Duration::seconds(self.config.bid_poll_interval_secs as i64),
                );
                Ok(Step::Stay("bid pending".to_string()))
            }
        }
    }

    /// Accepted -> Generating when a generation slot is free.
    pub(super) fn admit_generation(
        &self,
        item: &WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let grant = self.generation_admissions.try_reserve(
            &item.id,
            self.config.max_concurrent_generations,
            || {
                Ok(self
                    .registry
                    .count(&ItemFilter::new().with_status(ItemStatus::Generating))?)
            },
        )?;
        match grant {
            SlotGrant::Granted(reservation) => {
                ctx.reservation = Some(reservation);
                Ok(Step::Advance(ItemStatus::Generating))
            }
            SlotGrant::Full(generating) => {
                debug!(item_id = %item.id, generating, "Waiting for a generation slot");
                Ok(Step::Stay(format!("{} items generating", generating)))
            }
        }
    }

    /// Generating -> CheckingOriginality.
    pub(super) async fn generate(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let spec = GenerationSpec::from_detail(detail_of(item)?, self.engine.config());

        let _slot = self
            .generation_slots
            .acquire()
            .await
            .map_err(|_| OrchestratorError::ShuttingDown)?;

        let document = self.engine.generate(&spec, &mut ctx.tally).await?;
        ctx.log(
            item,
            action_kinds::GENERATE,
            ActionOutcome::Succeeded,
            format!(
                "{} sections, {} words",
                document.sections.len(),
                document.word_count()
            ),
        );
        item.document = Some(document);
        item.originality_checks = 0;
        item.rewrite_attempts = 0;
        item.pending_repair.clear();
        Ok(Step::Advance(ItemStatus::CheckingOriginality))
    }

    /// CheckingOriginality -> DraftDelivered or Rewriting.
    pub(super) async fn check_originality(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let threshold = self
            .originality
            .threshold_for(item.detail.as_ref().and_then(|d| d.required_uniqueness));
        let document = item
            .document
            .clone()
            .ok_or(OrchestratorError::MissingData("document"))?;

        let outcome = self.originality.check(&document, threshold).await?;
        item.originality_checks += 1;
        item.uniqueness = Some(outcome.uniqueness);
        ctx.log(
            item,
            action_kinds::ORIGINALITY_CHECK,
            if outcome.passed {
                ActionOutcome::Succeeded
            } else {
                ActionOutcome::Failed
            },
            format!(
                "{} check {}: {:.1}% (threshold {:.1}%)",
                outcome.kind.as_str(),
                item.originality_checks,
                outcome.uniqueness,
                threshold
            ),
        );

        match self
            .originality
            .decide(outcome.uniqueness, threshold, item.originality_checks)
        {
            Decision::Accept => {
                self.deliver(item, ctx, DeliveryKind::Draft).await?;
                Ok(Step::Advance(ItemStatus::DraftDelivered))
            }
            Decision::Rewrite => {
                item.pending_repair = self.originality.select_passages(&document, &outcome.report);
                Ok(Step::Advance(ItemStatus::Rewriting))
            }
            Decision::Exhausted => match self.originality.config().on_exhausted {
                ExhaustedPolicy::DeliverBestEffort => {
                    warn!(
                        item_id = %item.id,
                        uniqueness = outcome.uniqueness,
                        threshold,
                        "Originality checks exhausted, delivering best effort"
                    );
                    self.notify(Notification::OriginalityBestEffort {
                        item_id: item.id.clone(),
                        uniqueness: outcome.uniqueness,
                        threshold,
                    });
                    self.deliver(item, ctx, DeliveryKind::Draft).await?;
                    Ok(Step::Advance(ItemStatus::DraftDelivered))
                }
                ExhaustedPolicy::Fail => Err(OrchestratorError::OriginalityExhausted {
                    uniqueness: outcome.uniqueness,
                    threshold,
                    checks: item.originality_checks,
                }),
            },
        }
    }

    /// Rewriting -> CheckingOriginality.
    pub(super) async fn rewrite(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let threshold = self
            .originality
            .threshold_for(item.detail.as_ref().and_then(|d| d.required_uniqueness));
        let document = item
            .document
            .as_ref()
            .ok_or(OrchestratorError::MissingData("document"))?;

        let passages = if item.pending_repair.is_empty() {
            // No report survived (e.g. restart); fall back to the longest sections.
            self.originality
                .select_passages(document, &CheckReport::new(0.0))
        } else {
            item.pending_repair.clone()
        };

        let repaired = self
            .originality
            .repair(document, &passages, item.uniqueness, threshold, &mut ctx.tally)
            .await?;

        item.rewrite_attempts += 1;
        item.pending_repair.clear();
        ctx.log(
            item,
            action_kinds::REWRITE,
            ActionOutcome::Succeeded,
            format!("round {}: sections {:?}", item.rewrite_attempts, passages),
        );
        item.document = Some(repaired);
        Ok(Step::Advance(ItemStatus::CheckingOriginality))
    }

    /// DraftDelivered -> AwaitingApproval: tell the customer the draft is up.
    pub(super) async fn announce_draft(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        let body = self.responder.draft_ready_message(item);
        self.retry
            .run("send_message", || self.site.send_message(&item.external_ref, &body))
            .await?;
        self.registry.append_message(NewMessage {
            item_id: item.id.clone(),
            external_id: None,
            direction: MessageDirection::Outbound,
            origin: MessageOrigin::Auto,
            body,
            intent: None,
        })?;
        ctx.log(item, action_kinds::SEND_MESSAGE, ActionOutcome::Succeeded, "draft ready");
        Ok(Step::Advance(ItemStatus::AwaitingApproval))
    }

    /// AwaitingApproval -> FinalDelivered once the customer approves.
    ///
    /// The approval is recorded on the item before the upload, so a failed
    /// upload is retried without waiting for a second approval.
    pub(super) async fn await_approval(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        if !item.approval_received {
            let pass = self.handle_messages(item, ctx).await?;
            if !pass.approved {
                return Ok(Step::Stay("awaiting approval".to_string()));
            }
            item.approval_received = true;
        }
        self.deliver(item, ctx, DeliveryKind::Final).await?;
        Ok(Step::Advance(ItemStatus::FinalDelivered))
    }

    /// Store new customer messages and answer the ones that need an answer.
    ///
    /// A message that needs a reply is stored only once the reply went out,
    /// so a failed send leaves it unanswered for the next pass.
    pub(super) async fn handle_messages(
        &self,
        item: &WorkItem,
        ctx: &mut StageContext,
    ) -> Result<ConversationPass, OrchestratorError> {
        let received = self
            .retry
            .run("fetch_messages", || self.site.fetch_messages(&item.external_ref))
            .await?;

        let known: HashSet<String> = self
            .registry
            .messages(&item.id)?
            .into_iter()
            .filter_map(|m| m.external_id)
            .collect();

        let mut pass = ConversationPass::default();
        for message in received {
            if known.contains(&message.external_id) {
                continue;
            }
            let intent = match self
                .responder
                .classify(item, &message.body, &mut ctx.tally)
                .await
            {
                Ok(intent) => intent,
                Err(e) => {
                    warn!(item_id = %item.id, "Message classification failed: {}", e);
                    MessageIntent::Other
                }
            };

            let inbound = NewMessage {
                item_id: item.id.clone(),
                external_id: Some(message.external_id.clone()),
                direction: MessageDirection::Inbound,
                origin: MessageOrigin::Human,
                body: message.body.clone(),
                intent: Some(intent),
            };

            if intent == MessageIntent::Approval && item.status == ItemStatus::AwaitingApproval {
                if self.registry.append_message(inbound)?.is_some() {
                    info!(item_id = %item.id, "Customer approved the draft");
                    pass.new_messages += 1;
                    pass.approved = true;
                }
                continue;
            }

            let history = self.registry.messages(&item.id)?;
            let reply = match self
                .responder
                .reply(item, &history, &message.body, &mut ctx.tally)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(item_id = %item.id, "Reply generation failed: {}", e);
                    continue;
                }
            };

            self.retry
                .run("send_message", || self.site.send_message(&item.external_ref, &reply))
                .await?;
            if self.registry.append_message(inbound)?.is_none() {
                continue;
            }
            pass.new_messages += 1;
            self.registry.append_message(NewMessage {
                item_id: item.id.clone(),
                external_id: None,
                direction: MessageDirection::Outbound,
                origin: MessageOrigin::Auto,
                body: reply,
                intent: None,
            })?;
            ctx.log(
                item,
                action_kinds::SEND_MESSAGE,
                ActionOutcome::Succeeded,
                format!("reply to {} message", intent.as_str()),
            );
        }
        Ok(pass)
    }

    /// Assemble the current document and upload it.
    async fn deliver(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
        kind: DeliveryKind,
    ) -> Result<(), OrchestratorError> {
        let document = item
            .document
            .as_ref()
            .ok_or(OrchestratorError::MissingData("document"))?;
        let path = self.assembler.assemble(document).await?;

        self.retry
            .run("deliver", || {
                self.site.deliver(&item.external_ref, &path, kind)
            })
            .await?;

        let action = match kind {
            DeliveryKind::Draft => action_kinds::DELIVER_DRAFT,
            DeliveryKind::Final => action_kinds::DELIVER_FINAL,
        };
        ctx.log(item, action, ActionOutcome::Succeeded, path.display().to_string());
        info!(item_id = %item.id, kind = kind.as_str(), path = %path.display(), "Artifact delivered");
        item.artifact_path = Some(path.display().to_string());
        Ok(())
    }
}
