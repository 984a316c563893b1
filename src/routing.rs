// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing fabric (C3, spec §3, §4.4).
//!
//! Owns the tenant-scoped room/channel membership graph. Writers (subscribe,
//! unsubscribe, channel create/delete) serialize per tenant via the outer
//! `RwLock`; fan-out snapshots the recipient set at the start of delivery so
//! readers never observe a torn membership update (§5).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Serialize;

use crate::error::ArqonError;
use crate::state::SessionRegistry;

/// Room kind (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    System,
    User,
    Dynamic,
}

/// Channel kind (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    General,
    Private,
    System,
    Pm,
}

pub struct ChannelState {
    pub name: String,
    pub kind: ChannelType,
    pub participants: HashSet<String>,
    pub hardcoded: bool,
    pub created_at: Instant,
    pub created_by: String,
}

pub struct RoomState {
    pub name: String,
    pub kind: RoomType,
    pub channels: HashMap<String, ChannelState>,
    pub created_at: Instant,
    pub created_by: String,
}

impl RoomState {
    fn bootstrap_system(name: &str, channels: &[&str]) -> Self {
        let mut channel_map = HashMap::new();
        for c in channels {
            channel_map.insert(
                (*c).to_owned(),
                ChannelState {
                    name: (*c).to_owned(),
                    kind: ChannelType::System,
                    participants: HashSet::new(),
                    hardcoded: true,
                    created_at: Instant::now(),
                    created_by: "system".to_owned(),
                },
            );
        }
        Self {
            name: name.to_owned(),
            kind: RoomType::System,
            channels: channel_map,
            created_at: Instant::now(),
            created_by: "system".to_owned(),
        }
    }
}

/// Tenant-scoped routing fabric.
pub struct RoutingFabric {
    /// tenant_id -> room_name -> RoomState
    rooms: tokio::sync::RwLock<HashMap<String, HashMap<String, RoomState>>>,
}

impl RoutingFabric {
    pub fn new() -> Self {
        Self { rooms: tokio::sync::RwLock::new(HashMap::new()) }
    }

    /// Ensure a tenant has its immortal bootstrap `science` room (spec §3).
    pub async fn ensure_tenant_bootstrap(&self, tenant_id: &str) {
        let mut rooms = self.rooms.write().await;
        let tenant_rooms = rooms.entry(tenant_id.to_owned()).or_default();
        tenant_rooms
            .entry("science".to_owned())
            .or_insert_with(|| RoomState::bootstrap_system("science", &["general", "workflow"]));
    }

    /// Resolve the (room, channel) an inbound envelope targets (§4.4).
    ///
    /// Accepts an explicit `room`/`channel` pair, the combined `room:channel`
    /// shorthand in `room`, or falls back to the session's default.
    pub fn resolve_target(
        room: &str,
        channel: &str,
        session_default: Option<(&str, &str)>,
    ) -> Option<(String, String)> {
        if !room.is_empty() && !channel.is_empty() {
            return Some((room.to_owned(), channel.to_owned()));
        }
        if !room.is_empty() {
            if let Some((r, c)) = room.split_once(':') {
                return Some((r.to_owned(), c.to_owned()));
            }
        }
        session_default.map(|(r, c)| (r.to_owned(), c.to_owned()))
    }

    /// Idempotent subscribe. Auto-creates the channel (and user rooms) unless
    /// the room is a system room with an unknown channel (R4).
    pub async fn subscribe(
        &self,
        tenant_id: &str,
        room: &str,
        channel: &str,
        session_id: &str,
    ) -> Result<(), ArqonError> {
        let mut rooms = self.rooms.write().await;
        let tenant_rooms = rooms.entry(tenant_id.to_owned()).or_default();

        let room_state = tenant_rooms.entry(room.to_owned()).or_insert_with(|| RoomState {
            name: room.to_owned(),
            kind: RoomType::Dynamic,
            channels: HashMap::new(),
            created_at: Instant::now(),
            created_by: session_id.to_owned(),
        });

        if !room_state.channels.contains_key(channel) && room_state.kind == RoomType::System {
            return Err(ArqonError::ChannelNotFound);
        }

        let channel_state = room_state.channels.entry(channel.to_owned()).or_insert_with(|| ChannelState {
            name: channel.to_owned(),
            kind: ChannelType::General,
            participants: HashSet::new(),
            hardcoded: false,
            created_at: Instant::now(),
            created_by: session_id.to_owned(),
        });
        channel_state.participants.insert(session_id.to_owned());
        Ok(())
    }

    /// Idempotent unsubscribe.
    pub async fn unsubscribe(&self, tenant_id: &str, room: &str, channel: &str, session_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(tenant_rooms) = rooms.get_mut(tenant_id) {
            if let Some(room_state) = tenant_rooms.get_mut(room) {
                if let Some(channel_state) = room_state.channels.get_mut(channel) {
                    channel_state.participants.remove(session_id);
                }
            }
        }
    }

    /// Remove a session from every channel it participates in (on disconnect).
    pub async fn remove_session_everywhere(&self, tenant_id: &str, session_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(tenant_rooms) = rooms.get_mut(tenant_id) {
            for room_state in tenant_rooms.values_mut() {
                for channel_state in room_state.channels.values_mut() {
                    channel_state.participants.remove(session_id);
                }
            }
        }
    }

    /// Snapshot the current recipient set for (tenant, room, channel) (R2, §5).
    pub async fn recipients(&self, tenant_id: &str, room: &str, channel: &str) -> HashSet<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(tenant_id)
            .and_then(|t| t.get(room))
            .and_then(|r| r.channels.get(channel))
            .map(|c| c.participants.clone())
            .unwrap_or_default()
    }

    pub async fn create_channel(
        &self,
        tenant_id: &str,
        room: &str,
        channel: &str,
        kind: ChannelType,
        created_by: &str,
    ) -> Result<(), ArqonError> {
        let mut rooms = self.rooms.write().await;
        let tenant_rooms = rooms.entry(tenant_id.to_owned()).or_default();
        let room_state = tenant_rooms.entry(room.to_owned()).or_insert_with(|| RoomState {
            name: room.to_owned(),
            kind: RoomType::User,
            channels: HashMap::new(),
            created_at: Instant::now(),
            created_by: created_by.to_owned(),
        });
        if room_state.channels.contains_key(channel) {
            return Ok(());
        }
        room_state.channels.insert(
            channel.to_owned(),
            ChannelState {
                name: channel.to_owned(),
                kind,
                participants: HashSet::new(),
                hardcoded: false,
                created_at: Instant::now(),
                created_by: created_by.to_owned(),
            },
        );
        Ok(())
    }

    /// Delete a channel. Enforces C1 (hardcoded cannot be deleted) and C2
    /// (must be empty) from spec §3.
    pub async fn delete_channel(
        &self,
        tenant_id: &str,
        room: &str,
        channel: &str,
    ) -> Result<(), ArqonError> {
        let mut rooms = self.rooms.write().await;
        let room_state = rooms
            .get_mut(tenant_id)
            .and_then(|t| t.get_mut(room))
            .ok_or(ArqonError::ChannelNotFound)?;
        let channel_state =
            room_state.channels.get(channel).ok_or(ArqonError::ChannelNotFound)?;
        if channel_state.hardcoded {
            return Err(ArqonError::ChannelProtected);
        }
        if !channel_state.participants.is_empty() {
            return Err(ArqonError::ChannelNotEmpty);
        }
        room_state.channels.remove(channel);
        Ok(())
    }

    pub async fn channel_info(
        &self,
        tenant_id: &str,
        room: &str,
        channel: &str,
    ) -> Option<ChannelInfo> {
        let rooms = self.rooms.read().await;
        let c = rooms.get(tenant_id)?.get(room)?.channels.get(channel)?;
        Some(ChannelInfo {
            room: room.to_owned(),
            channel: c.name.clone(),
            kind: c.kind,
            participant_count: c.participants.len(),
            hardcoded: c.hardcoded,
        })
    }

    pub async fn list_channels(&self, tenant_id: &str, room: &str) -> Vec<ChannelInfo> {
        let rooms = self.rooms.read().await;
        rooms
            .get(tenant_id)
            .and_then(|t| t.get(room))
            .map(|r| {
                r.channels
                    .values()
                    .map(|c| ChannelInfo {
                        room: room.to_owned(),
                        channel: c.name.clone(),
                        kind: c.kind,
                        participant_count: c.participants.len(),
                        hardcoded: c.hardcoded,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for RoutingFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub room: String,
    pub channel: String,
    pub kind: ChannelType,
    pub participant_count: usize,
    pub hardcoded: bool,
}

/// Fan out a payload to every recipient of (tenant, room, channel), skipping
/// the sender unless `echo` is true (R1, R2, R3).
///
/// A full queue evicts its oldest non-essential entry to make room rather
/// than failing (§4.1 part (a)); only a recipient whose queue is full of
/// essential entries, or a recipient with no live session, is skipped.
/// Delivery to the rest proceeds regardless (R3). Cross-tenant delivery is
/// structurally impossible since `recipients` is tenant-scoped at lookup
/// (R1).
pub async fn fanout(
    registry: &SessionRegistry,
    recipients: HashSet<String>,
    sender_session_id: &str,
    echo: bool,
    payload: &serde_json::Value,
) -> usize {
    let mut delivered = 0;
    for session_id in recipients {
        if !echo && session_id == sender_session_id {
            continue;
        }
        if registry.try_send(&session_id, payload.clone()).await {
            delivered += 1;
        }
    }
    delivered
}

/// Deliver a `private` envelope only to listed client_ids present in the same
/// tenant (§4.4 `private_deliver`).
pub async fn private_deliver(
    registry: &SessionRegistry,
    tenant_id: &str,
    target_client_ids: &[String],
    payload: &serde_json::Value,
) -> usize {
    let mut delivered = 0;
    for session in registry.sessions_for_tenant(tenant_id).await {
        if target_client_ids.contains(&session.client_id) {
            if registry.try_send(&session.session_id, payload.clone()).await {
                delivered += 1;
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let fabric = RoutingFabric::new();
        fabric.subscribe("t1", "general", "chat", "s1").await.unwrap();
        fabric.subscribe("t1", "general", "chat", "s1").await.unwrap();
        let recipients = fabric.recipients("t1", "general", "chat").await;
        assert_eq!(recipients.len(), 1);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let fabric = RoutingFabric::new();
        fabric.subscribe("t1", "general", "chat", "s1").await.unwrap();
        fabric.subscribe("t2", "general", "chat", "s2").await.unwrap();
        assert_eq!(fabric.recipients("t1", "general", "chat").await.len(), 1);
        assert!(fabric.recipients("t1", "general", "chat").await.contains("s1"));
        assert!(!fabric.recipients("t1", "general", "chat").await.contains("s2"));
    }

    #[tokio::test]
    async fn system_room_rejects_unknown_channel() {
        let fabric = RoutingFabric::new();
        fabric.ensure_tenant_bootstrap("t1").await;
        let err = fabric.subscribe("t1", "science", "nonexistent", "s1").await.unwrap_err();
        assert_eq!(err, ArqonError::ChannelNotFound);
    }

    #[tokio::test]
    async fn delete_requires_empty_and_non_hardcoded() {
        let fabric = RoutingFabric::new();
        fabric.ensure_tenant_bootstrap("t1").await;
        let err = fabric.delete_channel("t1", "science", "general").await.unwrap_err();
        assert_eq!(err, ArqonError::ChannelProtected);

        fabric.create_channel("t1", "science", "explore", ChannelType::General, "admin").await.unwrap();
        fabric.subscribe("t1", "science", "explore", "s1").await.unwrap();
        let err = fabric.delete_channel("t1", "science", "explore").await.unwrap_err();
        assert_eq!(err, ArqonError::ChannelNotEmpty);

        fabric.unsubscribe("t1", "science", "explore", "s1").await;
        fabric.delete_channel("t1", "science", "explore").await.unwrap();
    }
}
