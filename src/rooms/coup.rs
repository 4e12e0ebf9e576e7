//! Coup sessions.
//!
//! A member may move to seize a room from its current owner. The vote
//! lives in the cache under a five-minute window; every vote is an
//! implicit "yes", and a strict majority of current non-bot members
//! executes the transfer.

use super::ownership::OwnershipManager;
use crate::cache::{CacheHandle, CoupSession, CoupVote, keys};
use crate::db::{Database, ModAction, ModHistoryEntry};
use crate::error::CommandError;
use crate::platform::{
    ChannelId, GuildId, Member, PermissionOverwrite, Platform, UserId, with_deadline,
};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Progress of a coup after a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoupOutcome {
    /// Vote recorded; more are needed.
    Pending { votes: usize, needed: usize },
    /// Majority reached; the room changed hands.
    Executed,
}

pub struct CoupManager {
    guild: GuildId,
    window: Duration,
    db: Database,
    cache: CacheHandle,
    platform: Arc<dyn Platform>,
    ownership: Arc<OwnershipManager>,
}

impl CoupManager {
    pub fn new(
        guild: GuildId,
        window: Duration,
        db: Database,
        cache: CacheHandle,
        platform: Arc<dyn Platform>,
        ownership: Arc<OwnershipManager>,
    ) -> Self {
        Self {
            guild,
            window,
            db,
            cache,
            platform,
            ownership,
        }
    }

    /// Open a coup: the initiator moves to take the room and casts the
    /// first vote.
    pub async fn start(
        &self,
        channel: ChannelId,
        initiator: UserId,
    ) -> Result<CoupOutcome, CommandError> {
        let room = self
            .db
            .channels()
            .get_channel(channel)
            .await?
            .filter(|r| r.active && r.is_user_room)
            .ok_or(CommandError::NoSuchRoom)?;

        if room.owner_id == Some(initiator) {
            return Err(CommandError::Refused("you already own this room".into()));
        }

        let members = self.non_bot_members(channel).await?;
        if !members.iter().any(|m| m.user_id == initiator) {
            return Err(CommandError::TargetNotInRoom);
        }

        if self.live_session(channel).await?.is_some() {
            return Err(CommandError::CoupInProgress);
        }

        let now = Utc::now();
        let session = CoupSession {
            target_user_id: initiator,
            votes: vec![CoupVote {
                voter_id: initiator,
                at: now,
            }],
            started_at: now,
            expires_at: now + TimeDelta::from_std(self.window).unwrap_or(TimeDelta::seconds(300)),
        };

        self.settle(channel, session, &members).await
    }

    /// Record one member's vote.
    pub async fn vote(
        &self,
        channel: ChannelId,
        voter: UserId,
    ) -> Result<CoupOutcome, CommandError> {
        let mut session = self
            .live_session(channel)
            .await?
            .ok_or(CommandError::NoCoup)?;

        if session.has_voted(voter) {
            return Err(CommandError::AlreadyVoted);
        }

        let members = self.non_bot_members(channel).await?;
        if !members.iter().any(|m| m.user_id == voter) {
            return Err(CommandError::TargetNotInRoom);
        }

        session.votes.push(CoupVote {
            voter_id: voter,
            at: Utc::now(),
        });

        self.settle(channel, session, &members).await
    }

    /// Persist or execute a session depending on the quorum.
    async fn settle(
        &self,
        channel: ChannelId,
        session: CoupSession,
        members: &[Member],
    ) -> Result<CoupOutcome, CommandError> {
        // Only votes from people still in the room count toward quorum.
        let votes = session
            .votes
            .iter()
            .filter(|v| members.iter().any(|m| m.user_id == v.voter_id))
            .count();
        let quorum_met = votes * 2 > members.len();

        if quorum_met {
            self.execute(channel, &session).await?;
            return Ok(CoupOutcome::Executed);
        }

        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(1));
        self.cache
            .set(&keys::coup(channel), &session, Some(remaining))
            .await?;

        Ok(CoupOutcome::Pending {
            votes,
            needed: members.len() / 2 + 1,
        })
    }

    async fn execute(&self, channel: ChannelId, session: &CoupSession) -> Result<(), CommandError> {
        let claimant = session.target_user_id;

        with_deadline(
            crate::platform::DEFAULT_DEADLINE,
            self.platform
                .upsert_overwrite(channel, PermissionOverwrite::owner(claimant)),
        )
        .await?;
        self.ownership
            .set_owner(channel, claimant, Utc::now())
            .await
            .map_err(CommandError::Internal)?;

        self.db
            .mod_history()
            .append(
                claimant,
                self.guild,
                ModHistoryEntry {
                    action: ModAction::Coup,
                    target_user_id: None,
                    channel_id: Some(channel),
                    reason: None,
                    at: Utc::now(),
                },
            )
            .await?;

        self.cache.delete(&keys::coup(channel)).await?;
        info!(channel_id = %channel, owner_id = %claimant, "Coup succeeded");
        Ok(())
    }

    /// The unexpired coup session for a room, if one exists.
    async fn live_session(&self, channel: ChannelId) -> Result<Option<CoupSession>, CommandError> {
        let key = keys::coup(channel);
        match self.cache.get::<CoupSession>(&key).await? {
            Some(session) if session.expires_at <= Utc::now() => {
                self.cache.delete(&key).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn non_bot_members(&self, channel: ChannelId) -> Result<Vec<Member>, CommandError> {
        Ok(self
            .platform
            .channel_members(channel)
            .await?
            .into_iter()
            .filter(|m| !m.is_bot)
            .collect())
    }
}
