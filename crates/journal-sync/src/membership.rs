//! Invite/Membership Directory: creating shared journals, inviting people,
//! joining and leaving.
//!
//! Remote writes go out as single tagged batches so the listener recognizes
//! their echoes. The local `Directory` is updated optimistically after each
//! successful write; the listener confirms it from the metadata feed.

use crate::auth::UserIdentity;
use crate::context::SyncContext;
use crate::directory::Directory;
use crate::ids::{InviteId, JournalId};
use crate::invite_link;
use crate::listener::ProjectionListener;
use crate::model::{Invite, InviteStatus, JournalMeta, ModelError, Role};
use crate::paths;
use crate::remote::{FieldChange, Query, RemoteError, WriteOp};

use serde_json::json;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Times a join is attempted when other joins keep using the same invite.
const JOIN_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Journal name must not be empty")]
    EmptyName,

    #[error("Journal not found: {0}")]
    JournalNotFound(JournalId),

    #[error("Not a member of journal {0}")]
    NotMember(JournalId),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, MembershipError>;

/// Why an invite could not be used. Displays as a message for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteRejection {
    UnknownInvite,
    Revoked,
    Exhausted,
    UnknownJournal,
}

impl Display for InviteRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let message = match self {
            InviteRejection::UnknownInvite => "This invite link is not valid.",
            InviteRejection::Revoked => "This invite is no longer active.",
            InviteRejection::Exhausted => "This invite has already been used the maximum number of times.",
            InviteRejection::UnknownJournal => "The journal for this invite no longer exists.",
        };
        f.write_str(message)
    }
}

/// Result of following an invite link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(JournalId),
    /// The user was already a member; the invite was not used.
    AlreadyMember(JournalId),
    /// The link could not be read. Nothing happened.
    Ignored,
    Rejected(InviteRejection),
}

impl Display for JoinOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JoinOutcome::Joined(_) => f.write_str("You joined the journal."),
            JoinOutcome::AlreadyMember(_) => f.write_str("You are already a member of this journal."),
            JoinOutcome::Ignored => f.write_str("That doesn't look like an invite link."),
            JoinOutcome::Rejected(reason) => write!(f, "{reason}"),
        }
    }
}

pub struct MembershipService {
    ctx: SyncContext,
    directory: Directory,
    listener: Arc<ProjectionListener>,
}

impl MembershipService {
    pub fn new(ctx: SyncContext, directory: Directory, listener: Arc<ProjectionListener>) -> Self {
        Self {
            ctx,
            directory,
            listener,
        }
    }

    fn current_user(&self) -> Result<UserIdentity> {
        self.ctx
            .auth
            .current_identity()
            .ok_or(MembershipError::NotSignedIn)
    }

    async fn write(&self, ops: Vec<WriteOp>) -> Result<()> {
        let tag = self.listener.own_writes().issue();
        self.ctx.remote.batch_write(ops, tag).await?;
        Ok(())
    }

    async fn listen(&self, journal_id: &JournalId) {
        if let Err(e) = self.listener.subscribe(journal_id).await {
            warn!("{}", e);
        }
    }

    /// Read an invite and check that it can still admit someone.
    async fn read_invite(
        &self,
        invite_path: &str,
        journal_id: &JournalId,
    ) -> Result<std::result::Result<Invite, InviteRejection>> {
        let invite = match self.ctx.remote.get(invite_path).await? {
            Some(doc) => match Invite::from_document(&doc) {
                Ok(invite) if invite.journal_id == *journal_id => invite,
                Ok(invite) => {
                    warn!("Invite {} belongs to another journal", invite.id);
                    return Ok(Err(InviteRejection::UnknownInvite));
                }
                Err(e) => {
                    warn!("Unreadable invite: {}", e);
                    return Ok(Err(InviteRejection::UnknownInvite));
                }
            },
            None => {
                debug!("Invite {} does not exist", invite_path);
                return Ok(Err(InviteRejection::UnknownInvite));
            }
        };

        Ok(match invite.status {
            InviteStatus::Active if invite.is_exhausted() => Err(InviteRejection::Exhausted),
            InviteStatus::Active => Ok(invite),
            InviteStatus::Exhausted => Err(InviteRejection::Exhausted),
            InviteStatus::Revoked => Err(InviteRejection::Revoked),
        })
    }

    async fn fetch_journal(&self, journal_id: &JournalId) -> Result<Option<JournalMeta>> {
        let doc = self.ctx.remote.get(&paths::journal(journal_id)).await?;
        Ok(doc.map(|doc| JournalMeta::from_document(&doc)).transpose()?)
    }

    /// Create a shared journal owned by the current user.
    pub async fn create_journal(&self, name: &str) -> Result<JournalMeta> {
        let user = self.current_user()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MembershipError::EmptyName);
        }

        let meta = JournalMeta {
            id: JournalId::generate(),
            name: name.to_string(),
            owner: user.id.clone(),
            created_at: self.ctx.clock.now_ms(),
            members: vec![user.display_name.clone()],
            member_ids: vec![user.id.clone()],
            last_entry: None,
        };
        self.write(vec![WriteOp::Set {
            path: paths::journal(&meta.id),
            data: meta.to_document_data()?,
        }])
        .await?;

        self.directory.upsert(meta.clone());
        self.listen(&meta.id).await;
        info!("Created journal {} ({})", meta.name, meta.id);
        Ok(meta)
    }

    /// Create an invite for a journal the current user belongs to and
    /// return its deep link.
    pub async fn create_invite_link(&self, journal_id: &JournalId, role: Role) -> Result<String> {
        let user = self.current_user()?;
        let meta = self
            .fetch_journal(journal_id)
            .await?
            .ok_or_else(|| MembershipError::JournalNotFound(journal_id.clone()))?;
        if !meta.has_member(&user.id) {
            return Err(MembershipError::NotMember(journal_id.clone()));
        }

        let invite = Invite {
            id: InviteId::generate(),
            journal_id: journal_id.clone(),
            creator: user.id,
            role,
            status: InviteStatus::Active,
            uses: 0,
            max_uses: self.ctx.config.invite_max_uses,
            created_at: self.ctx.clock.now_ms(),
        };
        self.write(vec![WriteOp::Set {
            path: paths::invite(journal_id, &invite.id),
            data: invite.to_document_data()?,
        }])
        .await?;

        info!("Created invite {} for journal {}", invite.id, journal_id);
        Ok(invite_link::build(
            &self.ctx.config.link_scheme,
            journal_id,
            &invite.id,
        ))
    }

    /// Follow an invite link.
    ///
    /// Unreadable links are `Ignored` and unusable invites `Rejected`; only
    /// remote failures and a missing sign-in are errors.
    pub async fn join_via_invite(&self, link: &str) -> Result<JoinOutcome> {
        let parsed = match invite_link::parse(link) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring invite link: {}", e);
                return Ok(JoinOutcome::Ignored);
            }
        };
        let Some((journal_id, invite_id)) = parsed.ids() else {
            warn!("Ignoring invite link without journal and invite IDs: {}", link);
            return Ok(JoinOutcome::Ignored);
        };
        let user = self.current_user()?;

        let invite_path = paths::invite(journal_id, invite_id);
        let mut attempt = 1;
        let mut meta = loop {
            let invite = match self.read_invite(&invite_path, journal_id).await? {
                Ok(invite) => invite,
                Err(rejection) => return Ok(JoinOutcome::Rejected(rejection)),
            };

            let meta = match self.fetch_journal(journal_id).await {
                Ok(Some(meta)) => meta,
                Ok(None) => return Ok(JoinOutcome::Rejected(InviteRejection::UnknownJournal)),
                Err(MembershipError::Model(e)) => {
                    warn!("Unreadable journal metadata: {}", e);
                    return Ok(JoinOutcome::Rejected(InviteRejection::UnknownJournal));
                }
                Err(e) => return Err(e),
            };

            if meta.has_member(&user.id) {
                debug!("{} is already a member of {}", user.id, journal_id);
                self.directory.upsert(meta);
                self.listen(journal_id).await;
                return Ok(JoinOutcome::AlreadyMember(journal_id.clone()));
            }

            // Fails if another join used the invite since it was read.
            let mut invite_changes = vec![
                FieldChange::Expect {
                    field: "uses".into(),
                    value: json!(invite.uses),
                },
                FieldChange::Increment {
                    field: "uses".into(),
                    by: 1,
                },
            ];
            if invite.uses + 1 >= invite.max_uses {
                invite_changes.push(FieldChange::Set {
                    field: "status".into(),
                    value: json!(InviteStatus::Exhausted),
                });
            }
            let result = self
                .write(vec![
                    WriteOp::Update {
                        path: paths::journal(journal_id),
                        changes: vec![
                            FieldChange::ArrayUnion {
                                field: "members".into(),
                                values: vec![json!(user.display_name)],
                            },
                            FieldChange::ArrayUnion {
                                field: "memberIds".into(),
                                values: vec![json!(user.id)],
                            },
                        ],
                    },
                    WriteOp::Update {
                        path: invite_path.clone(),
                        changes: invite_changes,
                    },
                ])
                .await;
            match result {
                Ok(()) => break meta,
                Err(MembershipError::Remote(RemoteError::PreconditionFailed { .. }))
                    if attempt < JOIN_ATTEMPTS =>
                {
                    debug!("Invite {} was used concurrently, retrying", invite_id);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        meta.admit(&user.id, &user.display_name);
        self.directory.upsert(meta);
        self.listen(journal_id).await;
        info!("Joined journal {} via invite {}", journal_id, invite_id);
        Ok(JoinOutcome::Joined(journal_id.clone()))
    }

    /// Leave a journal: drop the membership remotely, stop listening and
    /// forget it locally. Cached shared entries are kept.
    pub async fn leave_journal(&self, journal_id: &JournalId) -> Result<()> {
        let user = self.current_user()?;
        let result = self
            .write(vec![WriteOp::Update {
                path: paths::journal(journal_id),
                changes: vec![FieldChange::ArrayRemove {
                    field: "memberIds".into(),
                    values: vec![json!(user.id)],
                }],
            }])
            .await;
        match result {
            Ok(()) => {}
            Err(MembershipError::Remote(RemoteError::NotFound(_))) => {
                debug!("Journal {} is already gone", journal_id);
            }
            Err(e) => return Err(e),
        }

        self.listener.unsubscribe(journal_id).await;
        self.directory.remove(journal_id);
        info!("Left journal {}", journal_id);
        Ok(())
    }

    /// Rebuild the Directory from every journal listing the current user as
    /// a member and listen to each. Returns the journals found.
    pub async fn restore_journals(&self) -> Result<Vec<JournalId>> {
        let user = self.current_user()?;
        let query = Query::collection(paths::JOURNALS)
            .where_array_contains("memberIds", user.id.as_str());
        let docs = self.ctx.remote.query(&query).await?;

        let metas: Vec<JournalMeta> = docs
            .iter()
            .filter_map(|doc| match JournalMeta::from_document(doc) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!("Skipping journal: {}", e);
                    None
                }
            })
            .collect();
        let ids: Vec<JournalId> = metas.iter().map(|meta| meta.id.clone()).collect();
        let added = self.directory.merge(metas);

        for id in &ids {
            self.listen(id).await;
        }
        info!("Restored {} journal(s), {} new", ids.len(), added.len());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, StaticAuth};
    use crate::cache::EntryCache;
    use crate::clock::ManualClock;
    use crate::config::SyncConfig;
    use crate::listener::ListenerState;
    use crate::remote::{Document, InMemoryRemote, RemoteStore, Subscription, Target, WriteTag};
    use crate::tracker::WriteTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Store where another device uses an invite right after the first time
    /// it is read.
    struct ContendedInvites {
        inner: InMemoryRemote,
        raced: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for ContendedInvites {
        async fn get(&self, path: &str) -> crate::remote::Result<Option<Document>> {
            let doc = self.inner.get(path).await?;
            if path.contains("/invites/") && !self.raced.swap(true, Ordering::SeqCst) {
                let invite = Invite::from_document(doc.as_ref().unwrap()).unwrap();
                let mut changes = vec![FieldChange::Increment {
                    field: "uses".into(),
                    by: 1,
                }];
                if invite.uses + 1 >= invite.max_uses {
                    changes.push(FieldChange::Set {
                        field: "status".into(),
                        value: json!("exhausted"),
                    });
                }
                self.inner
                    .batch_write(
                        vec![WriteOp::Update {
                            path: path.to_string(),
                            changes,
                        }],
                        WriteTag::new(),
                    )
                    .await?;
            }
            Ok(doc)
        }

        async fn batch_write(&self, ops: Vec<WriteOp>, tag: WriteTag) -> crate::remote::Result<()> {
            self.inner.batch_write(ops, tag).await
        }

        async fn query(&self, query: &Query) -> crate::remote::Result<Vec<Document>> {
            self.inner.query(query).await
        }

        async fn subscribe(&self, target: Target) -> crate::remote::Result<Subscription> {
            self.inner.subscribe(target).await
        }
    }

    fn contended(remote: &InMemoryRemote) -> Arc<dyn RemoteStore> {
        Arc::new(ContendedInvites {
            inner: remote.clone(),
            raced: AtomicBool::new(false),
        })
    }

    struct Device {
        auth: StaticAuth,
        directory: Directory,
        listener: Arc<ProjectionListener>,
        membership: MembershipService,
    }

    fn device_with(remote: &InMemoryRemote, id: &str, name: &str, config: SyncConfig) -> Device {
        device_on(Arc::new(remote.clone()), id, name, config)
    }

    fn device_on(
        remote: Arc<dyn RemoteStore>,
        id: &str,
        name: &str,
        config: SyncConfig,
    ) -> Device {
        let auth = StaticAuth::signed_in(UserIdentity::new(id, name));
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = SyncContext::builder(remote, Arc::new(auth.clone()))
            .clock(clock.clone())
            .config(config)
            .build();
        let directory = Directory::new();
        let listener = Arc::new(ProjectionListener::new(
            ctx.clone(),
            EntryCache::new(clock),
            directory.clone(),
            WriteTracker::new(Duration::from_secs(300)),
        ));
        let membership = MembershipService::new(ctx, directory.clone(), Arc::clone(&listener));
        Device {
            auth,
            directory,
            listener,
            membership,
        }
    }

    fn device(remote: &InMemoryRemote, id: &str, name: &str) -> Device {
        device_with(remote, id, name, SyncConfig::default())
    }

    fn invite_data(remote: &InMemoryRemote, link: &str) -> serde_json::Value {
        let parsed = invite_link::parse(link).unwrap();
        let (journal, invite) = parsed.ids().unwrap();
        remote.document(&paths::invite(journal, invite)).unwrap().data
    }

    #[tokio::test]
    async fn test_create_journal() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");

        let meta = owner.membership.create_journal("  Family  ").await.unwrap();

        assert_eq!(meta.name, "Family");
        assert_eq!(meta.member_ids, vec![Identity::new("u1")]);
        assert_eq!(meta.members, vec!["Ada".to_string()]);
        let stored = remote.document(&paths::journal(&meta.id)).unwrap();
        assert_eq!(stored.data["owner"], "u1");
        assert!(owner.directory.contains(&meta.id));
        assert_eq!(owner.listener.state(&meta.id), ListenerState::Active);
    }

    #[tokio::test]
    async fn test_create_journal_requires_name_and_sign_in() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");

        assert!(matches!(
            owner.membership.create_journal("   ").await,
            Err(MembershipError::EmptyName)
        ));
        owner.auth.sign_out();
        assert!(matches!(
            owner.membership.create_journal("Family").await,
            Err(MembershipError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_invite_link_points_at_active_invite() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let meta = owner.membership.create_journal("Family").await.unwrap();

        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();

        assert!(link.starts_with(&format!("journal://invite?journal={}&invite=", meta.id)));
        let invite = invite_data(&remote, &link);
        assert_eq!(invite["status"], "active");
        assert_eq!(invite["uses"], 0);
        assert_eq!(invite["maxUses"], 50);
        assert_eq!(invite["creator"], "u1");
    }

    #[tokio::test]
    async fn test_only_members_can_invite() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let outsider = device(&remote, "u9", "Eve");
        let meta = owner.membership.create_journal("Family").await.unwrap();

        assert!(matches!(
            outsider
                .membership
                .create_invite_link(&meta.id, Role::Member)
                .await,
            Err(MembershipError::NotMember(_))
        ));
        assert!(matches!(
            owner
                .membership
                .create_invite_link(&"missing".parse().unwrap(), Role::Member)
                .await,
            Err(MembershipError::JournalNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_three_joins_count_three_uses() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();

        for (id, name) in [("u2", "Bea"), ("u3", "Cal"), ("u4", "Dee")] {
            let joiner = device(&remote, id, name);
            let outcome = joiner.membership.join_via_invite(&link).await.unwrap();
            assert_eq!(outcome, JoinOutcome::Joined(meta.id.clone()));
            assert!(joiner.directory.contains(&meta.id));
            assert_eq!(joiner.listener.state(&meta.id), ListenerState::Active);
        }

        let invite = invite_data(&remote, &link);
        assert_eq!(invite["uses"], 3);
        assert_eq!(invite["status"], "active");
        let journal = remote.document(&paths::journal(&meta.id)).unwrap();
        assert_eq!(journal.data["memberIds"], json!(["u1", "u2", "u3", "u4"]));
        assert_eq!(journal.data["members"], json!(["Ada", "Bea", "Cal", "Dee"]));
    }

    #[tokio::test]
    async fn test_existing_member_does_not_use_invite() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();

        let outcome = owner.membership.join_via_invite(&link).await.unwrap();

        assert_eq!(outcome, JoinOutcome::AlreadyMember(meta.id.clone()));
        assert_eq!(invite_data(&remote, &link)["uses"], 0);
    }

    #[tokio::test]
    async fn test_invite_cap_is_hard() {
        let remote = InMemoryRemote::new();
        let config = SyncConfig {
            invite_max_uses: 2,
            ..SyncConfig::default()
        };
        let owner = device_with(&remote, "u1", "Ada", config);
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();

        for id in ["u2", "u3"] {
            let joiner = device(&remote, id, id);
            assert!(matches!(
                joiner.membership.join_via_invite(&link).await.unwrap(),
                JoinOutcome::Joined(_)
            ));
        }
        assert_eq!(invite_data(&remote, &link)["status"], "exhausted");

        let late = device(&remote, "u4", "Dee");
        let outcome = late.membership.join_via_invite(&link).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(InviteRejection::Exhausted));
        assert_eq!(invite_data(&remote, &link)["uses"], 2);
        assert!(!late.directory.contains(&meta.id));
    }

    #[tokio::test]
    async fn test_concurrent_use_of_last_slot_is_rejected() {
        let remote = InMemoryRemote::new();
        let config = SyncConfig {
            invite_max_uses: 2,
            ..SyncConfig::default()
        };
        let owner = device_with(&remote, "u1", "Ada", config);
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();
        device(&remote, "u2", "Bea")
            .membership
            .join_via_invite(&link)
            .await
            .unwrap();

        // Reads uses = 1, but another join takes the last use before the write.
        let late = device_on(contended(&remote), "u3", "Cy", SyncConfig::default());
        let outcome = late.membership.join_via_invite(&link).await.unwrap();

        assert_eq!(outcome, JoinOutcome::Rejected(InviteRejection::Exhausted));
        let invite = invite_data(&remote, &link);
        assert_eq!(invite["uses"], 2);
        assert_eq!(invite["status"], "exhausted");
        let stored = remote.document(&paths::journal(&meta.id)).unwrap();
        assert!(!stored.data["memberIds"].as_array().unwrap().contains(&json!("u3")));
        assert!(!late.directory.contains(&meta.id));
    }

    #[tokio::test]
    async fn test_concurrent_use_with_room_left_retries() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();

        let joiner = device_on(contended(&remote), "u2", "Bea", SyncConfig::default());
        let outcome = joiner.membership.join_via_invite(&link).await.unwrap();

        assert_eq!(outcome, JoinOutcome::Joined(meta.id.clone()));
        // One use by the other device, one by this join.
        assert_eq!(invite_data(&remote, &link)["uses"], 2);
        assert_eq!(invite_data(&remote, &link)["status"], "active");
    }

    #[tokio::test]
    async fn test_unreadable_links_are_ignored() {
        let remote = InMemoryRemote::new();
        let joiner = device(&remote, "u2", "Bea");

        for link in ["", "not a url", "journal://invite?journal=abc"] {
            assert_eq!(
                joiner.membership.join_via_invite(link).await.unwrap(),
                JoinOutcome::Ignored
            );
        }
        assert_eq!(remote.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_unusable_invites_are_rejected() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let joiner = device(&remote, "u2", "Bea");
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();

        let unknown = format!("journal://invite?journal={}&invite=nope", meta.id);
        assert_eq!(
            joiner.membership.join_via_invite(&unknown).await.unwrap(),
            JoinOutcome::Rejected(InviteRejection::UnknownInvite)
        );

        let parsed = invite_link::parse(&link).unwrap();
        let (journal, invite) = parsed.ids().unwrap();
        let path = paths::invite(journal, invite);
        let mut revoked = remote.document(&path).unwrap().data;
        revoked["status"] = json!("revoked");
        remote.put(&path, revoked, None);
        let outcome = joiner.membership.join_via_invite(&link).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(InviteRejection::Revoked));
        assert_eq!(outcome.to_string(), "This invite is no longer active.");

        let mut active = remote.document(&path).unwrap().data;
        active["status"] = json!("active");
        remote.put(&path, active, None);
        remote.remove(&paths::journal(&meta.id));
        assert_eq!(
            joiner.membership.join_via_invite(&link).await.unwrap(),
            JoinOutcome::Rejected(InviteRejection::UnknownJournal)
        );
    }

    #[tokio::test]
    async fn test_leave_journal() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let member = device(&remote, "u2", "Bea");
        let meta = owner.membership.create_journal("Family").await.unwrap();
        let link = owner
            .membership
            .create_invite_link(&meta.id, Role::Member)
            .await
            .unwrap();
        member.membership.join_via_invite(&link).await.unwrap();

        member.membership.leave_journal(&meta.id).await.unwrap();

        let journal = remote.document(&paths::journal(&meta.id)).unwrap();
        assert_eq!(journal.data["memberIds"], json!(["u1"]));
        // Display names are history; only the ID list gates membership.
        assert_eq!(journal.data["members"], json!(["Ada", "Bea"]));
        assert!(!member.directory.contains(&meta.id));
        assert_eq!(member.listener.state(&meta.id), ListenerState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_leave_deleted_journal_cleans_up_locally() {
        let remote = InMemoryRemote::new();
        let owner = device(&remote, "u1", "Ada");
        let meta = owner.membership.create_journal("Family").await.unwrap();
        remote.remove(&paths::journal(&meta.id));

        owner.membership.leave_journal(&meta.id).await.unwrap();

        assert!(!owner.directory.contains(&meta.id));
    }

    #[tokio::test]
    async fn test_restore_journals() {
        let remote = InMemoryRemote::new();
        let first = device(&remote, "u1", "Ada");
        let a = first.membership.create_journal("A").await.unwrap();
        let b = first.membership.create_journal("B").await.unwrap();
        let other = device(&remote, "u2", "Bea");
        let c = other.membership.create_journal("C").await.unwrap();

        let reinstalled = device(&remote, "u1", "Ada");
        let mut restored = reinstalled.membership.restore_journals().await.unwrap();
        restored.sort();

        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(restored, expected);
        assert!(reinstalled.directory.contains(&a.id));
        assert!(!reinstalled.directory.contains(&c.id));
        assert_eq!(reinstalled.listener.state(&b.id), ListenerState::Active);
    }
}
