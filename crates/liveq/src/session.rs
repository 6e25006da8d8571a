//! Session registry.
//!
//! Sessions are created on socket accept and destroyed on socket close
//! or auth failure. Each session entity carries the transport socket,
//! the authenticated principal, the app owner's user record, the
//! client's library version map, and the request-coalescing datalog
//! loader — all on the same entity identity the subscription graph
//! joins against, so a session removal can cascade in one transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use liveq_error::{LiveqError, Result};
use liveq_store::{Attr, ERef, Lookup, TxOp};
use liveq_types::{AppId, OpaqueHandle, QueryDoc, SessionId, Value};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::datalog::clean_stale_datalog_op;
use crate::socket::{Socket, record_dropped_event};
use crate::store::ReactiveStore;

/// The authenticated principal of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    pub app_id: AppId,
    /// The authenticated user record, absent for anonymous sessions.
    pub user: Option<serde_json::Value>,
    pub admin: bool,
}

impl Auth {
    fn to_value(&self) -> Value {
        Value::Json(QueryDoc::new(json!({
            "app-id": self.app_id.get(),
            "user": self.user,
            "admin": self.admin,
        })))
    }

    fn from_doc(doc: &QueryDoc) -> Option<Self> {
        let obj = doc.json().as_object()?;
        Some(Self {
            app_id: AppId::new(obj.get("app-id")?.as_u64()?),
            user: obj.get("user").filter(|v| !v.is_null()).cloned(),
            admin: obj.get("admin").and_then(serde_json::Value::as_bool).unwrap_or(false),
        })
    }
}

/// The app owner's user record, opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord(QueryDoc);

impl UserRecord {
    #[must_use]
    pub fn new(json: serde_json::Value) -> Self {
        Self(QueryDoc::new(json))
    }

    #[must_use]
    pub fn json(&self) -> &serde_json::Value {
        self.0.json()
    }

    fn to_value(&self) -> Value {
        Value::Json(self.0.clone())
    }
}

/// Fields settable in one shot after authentication.
#[derive(Debug, Clone)]
pub struct SessionProps {
    pub auth: Auth,
    pub creator: UserRecord,
    /// Client library name → version string.
    pub versions: Option<BTreeMap<String, String>>,
}

fn session_ref(session_id: SessionId) -> ERef {
    ERef::Upsert(Attr::SessionId, Value::Uuid(session_id.get()))
}

fn versions_value(versions: &BTreeMap<String, String>) -> Value {
    Value::Json(QueryDoc::new(json!(versions)))
}

impl ReactiveStore {
    /// Bind (or rebind) the transport socket of a session, creating
    /// the session entity if this is the first contact.
    pub fn add_socket(&self, session_id: SessionId, socket: Arc<dyn Socket>) -> Result<()> {
        self.inner()
            .transact("add-socket", vec![TxOp::Add(
                session_ref(session_id),
                Attr::SessionSocket,
                Value::Handle(OpaqueHandle::new(socket)),
            )])
            .map(drop)
    }

    /// Set the authenticated principal.
    pub fn set_auth(&self, session_id: SessionId, auth: &Auth) -> Result<()> {
        self.inner()
            .transact("set-auth", vec![TxOp::Add(
                session_ref(session_id),
                Attr::SessionAuth,
                auth.to_value(),
            )])
            .map(drop)
    }

    /// Set the app owner's user record.
    pub fn set_creator(&self, session_id: SessionId, creator: &UserRecord) -> Result<()> {
        self.inner()
            .transact("set-creator", vec![TxOp::Add(
                session_ref(session_id),
                Attr::SessionCreator,
                creator.to_value(),
            )])
            .map(drop)
    }

    /// Set auth, creator, and optionally the client version map, in
    /// one transaction.
    pub fn set_session_props(&self, session_id: SessionId, props: &SessionProps) -> Result<()> {
        let mut ops = vec![
            TxOp::Add(session_ref(session_id), Attr::SessionAuth, props.auth.to_value()),
            TxOp::Add(session_ref(session_id), Attr::SessionCreator, props.creator.to_value()),
        ];
        if let Some(versions) = &props.versions {
            ops.push(TxOp::Add(
                session_ref(session_id),
                Attr::SessionVersions,
                versions_value(versions),
            ));
        }
        self.inner().transact("set-session-props", ops).map(drop)
    }

    /// Return the session's datalog loader, installing the one `make`
    /// produces if none is bound yet. Concurrent callers all receive
    /// the handle that won.
    pub fn upsert_datalog_loader(
        &self,
        session_id: SessionId,
        make: impl FnOnce() -> OpaqueHandle,
    ) -> Result<OpaqueHandle> {
        let sid = Value::Uuid(session_id.get());
        let (_, loader) = self.inner().transact_with("upsert-datalog-loader", |db| {
            if let Some(session) = db.entity(Lookup::Unique(Attr::SessionId, sid.clone())) {
                if let Some(existing) =
                    session.get(Attr::SessionDatalogLoader).and_then(Value::as_handle)
                {
                    return Ok((vec![], existing.clone()));
                }
            }
            let loader = make();
            let ops = vec![TxOp::Add(
                session_ref(session_id),
                Attr::SessionDatalogLoader,
                Value::Handle(loader.clone()),
            )];
            Ok((ops, loader))
        })?;
        Ok(loader)
    }

    /// Current auth of a session, if any.
    #[must_use]
    pub fn session_auth(&self, session_id: SessionId) -> Option<Auth> {
        let db = self.db();
        let session = db.entity(Lookup::Unique(Attr::SessionId, Value::Uuid(session_id.get())))?;
        session.get(Attr::SessionAuth).and_then(Value::as_json).and_then(Auth::from_doc)
    }

    /// Client library version map of a session, if reported.
    #[must_use]
    pub fn session_versions(&self, session_id: SessionId) -> Option<BTreeMap<String, String>> {
        let db = self.db();
        let session = db.entity(Lookup::Unique(Attr::SessionId, Value::Uuid(session_id.get())))?;
        let doc = session.get(Attr::SessionVersions).and_then(Value::as_json)?;
        serde_json::from_value(doc.json().clone()).ok()
    }

    /// Tear down a session: the session entity, its instaql queries,
    /// its subscriptions, and any datalog queries those subscriptions
    /// were the last reference to — one atomic cascade. A no-op (and
    /// idempotent) when the session does not exist.
    pub fn remove_session(&self, session_id: SessionId) -> Result<()> {
        let report = self.inner().transact("remove-session", vec![TxOp::call(move |db| {
            let sid = Value::Uuid(session_id.get());
            let Some(session) = db.resolve(&Lookup::Unique(Attr::SessionId, sid.clone())) else {
                return Ok(vec![]);
            };
            let mut ops = Vec::new();
            for e in db.lookup_all(Attr::InstaqlSessionId, &sid) {
                ops.push(TxOp::RetractEntity(ERef::Id(e)));
            }
            for e in db.lookup_all(Attr::SubSessionId, &sid) {
                ops.push(TxOp::RetractEntity(ERef::Id(e)));
            }
            ops.push(TxOp::RetractEntity(ERef::Id(session)));
            ops.push(clean_stale_datalog_op());
            Ok(ops)
        })])?;
        debug!(
            target: "liveq.session",
            %session_id,
            retracted = report.tx_data.len(),
            "session removed"
        );
        Ok(())
    }

    /// Serialize `event` as one JSON frame and write it to the socket
    /// bound to the session.
    ///
    /// Fails with [`LiveqError::SessionMissing`] when the session is
    /// gone, [`LiveqError::SocketMissing`] when no socket is bound, and
    /// [`LiveqError::SocketError`] when the transport write fails.
    pub fn send_event<E: Serialize>(
        &self,
        app_id: AppId,
        session_id: SessionId,
        event: &E,
    ) -> Result<()> {
        let db = self.db();
        let session = db
            .entity(Lookup::Unique(Attr::SessionId, Value::Uuid(session_id.get())))
            .ok_or(LiveqError::SessionMissing { session_id })?;
        let socket = session
            .get(Attr::SessionSocket)
            .and_then(Value::as_handle)
            .and_then(|h| h.downcast_ref::<Arc<dyn Socket>>())
            .cloned()
            .ok_or(LiveqError::SocketMissing { session_id })?;

        let frame = serde_json::to_string(event).map_err(|err| LiveqError::SocketError {
            session_id,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        })?;
        socket
            .send_frame(&frame)
            .map_err(|source| LiveqError::SocketError { session_id, source })?;
        debug!(target: "liveq.session", %app_id, %session_id, bytes = frame.len(), "event sent");
        Ok(())
    }

    /// [`Self::send_event`], but delivery failures are recorded and
    /// swallowed instead of propagated.
    pub fn try_send_event<E: Serialize>(&self, app_id: AppId, session_id: SessionId, event: &E) {
        if let Err(err) = self.send_event(app_id, session_id, event) {
            record_dropped_event();
            warn!(target: "liveq.session", %app_id, %session_id, %err, "event dropped");
        }
    }
}
