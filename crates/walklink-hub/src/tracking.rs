use crate::hub::Hub;
use crate::rooms::RoomKey;
use crate::session::Client;
use crate::throttle::Admission;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walklink_core::geo::{geohash, DEFAULT_GEOHASH_PRECISION};
use walklink_core::protocol::{LocationEvent, ServerEvent, StatusChangePayload};
use walklink_core::{
    HubError, LocationPayload, LocationUpdate, PositionUpdate, WalkRecord, WalkStatus,
};

pub const WALK_NOT_FOUND: &str = "Paseo no encontrado";
pub const WALK_NOT_AUTHORIZED: &str = "No autorizado para este paseo";
pub const ONLY_WALKER: &str = "Solo el paseador puede enviar ubicación";
pub const NOT_IN_PROGRESS: &str = "Solo se puede enviar ubicación cuando el paseo está en curso";
pub const INVALID_STATUS: &str = "Estado inválido";

impl Hub {
    async fn participant_walk(&self, walk_id: &str, uid: &str) -> Result<WalkRecord, HubError> {
        let walk = self
            .store
            .get_walk(walk_id)
            .await?
            .ok_or_else(|| HubError::not_found(WALK_NOT_FOUND))?;
        if !walk.is_participant(uid) {
            return Err(HubError::authorization(WALK_NOT_AUTHORIZED));
        }
        Ok(walk)
    }

    pub(crate) async fn join_walk(
        self: &Arc<Self>,
        client: &Arc<Client>,
        walk_id: &str,
    ) -> Result<(), HubError> {
        let walk_id = walk_id.trim();
        if walk_id.is_empty() {
            return Err(HubError::validation(walklink_core::location::INVALID_WALK_ID));
        }
        self.rooms
            .join_with(RoomKey::Walk(walk_id.to_string()), client, || async {
                let walk = self.participant_walk(walk_id, client.uid()).await?;
                let cached = self.status_cache.put(walk_id, &walk).await;
                Ok::<_, HubError>(ServerEvent::JoinedPaseo {
                    walk_id: walk_id.to_string(),
                    estado: cached.status.to_string(),
                })
            })
            .await?;
        info!(event = "walk_join", walk_id = walk_id, uid = %client.uid());
        Ok(())
    }

    /// Relays a live sample to the walk room, then persists at most one
    /// sample per walker per throttle window.
    pub(crate) async fn update_location(
        self: &Arc<Self>,
        client: &Arc<Client>,
        payload: LocationPayload,
    ) -> Result<(), HubError> {
        let update = payload
            .normalize(Utc::now())
            .map_err(HubError::validation)?;
        let status = self
            .status_cache
            .resolve(self.store.as_ref(), &update.walk_id)
            .await?
            .ok_or_else(|| HubError::not_found(WALK_NOT_FOUND))?;
        if status.walker_id != client.uid() {
            return Err(HubError::authorization(ONLY_WALKER));
        }
        if !status.status.is_in_progress() {
            return Err(HubError::authorization(NOT_IN_PROGRESS));
        }

        let event = ServerEvent::UpdateLocation(LocationEvent {
            walk_id: update.walk_id.clone(),
            lat: update.point.latitude,
            lng: update.point.longitude,
            acc: update.accuracy,
            speed: update.speed,
            ts: update.captured_at.timestamp_millis(),
        });
        let delivered = self
            .rooms
            .broadcast(&RoomKey::Walk(update.walk_id.clone()), &event, None)
            .await;

        match self.throttle.try_admit(client.uid(), update.point).await {
            Admission::Throttled => {
                debug!(
                    event = "location_relayed",
                    walk_id = %update.walk_id,
                    owner = %status.owner_id,
                    delivered = delivered
                );
            }
            Admission::Admitted { moved_km } => {
                self.persist_location(client.uid(), &update).await;
                info!(
                    event = "location_persisted",
                    walk_id = %update.walk_id,
                    uid = %client.uid(),
                    delivered = delivered,
                    moved_km = moved_km.unwrap_or(0.0)
                );
            }
        }
        Ok(())
    }

    /// Three independent writes; one failing does not stop the others.
    async fn persist_location(&self, walker_id: &str, update: &LocationUpdate) {
        let position = PositionUpdate {
            point: update.point,
            geohash: geohash(update.point, DEFAULT_GEOHASH_PRECISION),
            at: update.captured_at,
        };
        let sample = update.sample();
        let (history, user, search) = tokio::join!(
            self.store.append_walk_location(&update.walk_id, &sample),
            self.store.update_user_position(walker_id, &position),
            self.store.upsert_walker_search_position(walker_id, &position),
        );
        for (record, outcome) in [("walk", history), ("user", user), ("search", search)] {
            if let Err(err) = outcome {
                warn!(
                    event = "location_write_failed",
                    record = record,
                    walk_id = %update.walk_id,
                    uid = walker_id,
                    error = %err
                );
            }
        }
    }

    pub(crate) async fn change_walk_status(
        self: &Arc<Self>,
        client: &Arc<Client>,
        payload: StatusChangePayload,
    ) -> Result<(), HubError> {
        let walk_id = payload.walk_id.trim();
        if walk_id.is_empty() {
            return Err(HubError::validation(walklink_core::location::INVALID_WALK_ID));
        }
        let status = WalkStatus::from(payload.new_status.as_str());
        if payload.new_status.trim().is_empty() || !status.is_known() {
            return Err(HubError::validation(INVALID_STATUS));
        }

        let mut walk = self.participant_walk(walk_id, client.uid()).await?;
        self.store
            .set_walk_status(walk_id, &status, Utc::now())
            .await?;
        walk.status = status.clone();
        self.status_cache.put(walk_id, &walk).await;
        if status.is_terminal() {
            self.throttle.forget(&walk.walker_id).await;
        }

        self.rooms
            .broadcast(
                &RoomKey::Walk(walk_id.to_string()),
                &ServerEvent::PaseoUpdated {
                    walk_id: walk_id.to_string(),
                    estado: status.to_string(),
                    changed_by: client.uid().to_string(),
                },
                None,
            )
            .await;
        info!(
            event = "walk_status_changed",
            walk_id = walk_id,
            status = %status,
            uid = %client.uid()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::{
        drain, events_named, identity, test_hub_config, RecordingNotifier,
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use walklink_core::protocol::ClientCommand;
    use walklink_core::{RecordStore, Role};

    fn sample(walk_id: &str, lat: f64) -> LocationPayload {
        LocationPayload {
            p: Some(walk_id.to_string()),
            lat: Some(lat),
            lng: Some(-84.2),
            acc: Some(5.0),
            spd: Some(1.2),
            ts: Some(1_700_000_000_000),
            ..LocationPayload::default()
        }
    }

    fn hub_with(config: Config) -> (Arc<Hub>, Arc<crate::test_support::TestStore>) {
        test_hub_config(config, RecordingNotifier::new())
    }

    #[tokio::test]
    async fn join_walk_confirms_with_current_status() {
        let (hub, _store) = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(64);
        let owner = hub.attach(identity("owner-1", Role::Owner), tx).await;
        drain(&mut rx);

        hub.run_command(&owner, ClientCommand::JoinPaseo("S123".to_string()))
            .await;
        hub.run_command(&owner, ClientCommand::JoinPaseo("S999".to_string()))
            .await;
        hub.run_command(&owner, ClientCommand::JoinPaseo("S300".to_string()))
            .await;

        let frames = drain(&mut rx);
        let joined = events_named(&frames, "joined_paseo");
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0]["data"], json!({"paseoId": "S123", "estado": "EN_CURSO"}));
        let errors = events_named(&frames, "error");
        assert_eq!(errors[0]["data"]["message"], "Paseo no encontrado");
        assert_eq!(errors[1]["data"]["message"], "No autorizado para este paseo");
        assert!(hub
            .rooms
            .is_member(&RoomKey::Walk("S123".to_string()), &owner.conn_id)
            .await);
    }

    #[tokio::test]
    async fn walker_sample_reaches_the_room_in_compact_form() {
        let (hub, store) = hub_with(Config::default());
        let (tx_o, mut rx_o) = mpsc::channel(64);
        let (tx_w, mut rx_w) = mpsc::channel(64);
        let owner = hub.attach(identity("owner-1", Role::Owner), tx_o).await;
        let walker = hub.attach(identity("walker-1", Role::Walker), tx_w).await;
        hub.join_walk(&owner, "S123").await.expect("owner join");
        drain(&mut rx_o);
        drain(&mut rx_w);

        hub.update_location(&walker, sample("S123", 10.1))
            .await
            .expect("update");

        let frames = drain(&mut rx_o);
        let updates = events_named(&frames, "update_location");
        assert_eq!(
            updates[0]["data"],
            json!({
                "paseoId": "S123",
                "lat": 10.1,
                "lng": -84.2,
                "acc": 5.0,
                "speed": 1.2,
                "ts": 1_700_000_000_000_i64
            })
        );
        assert_eq!(store.walk_locations("S123").await.len(), 1);
        let position = store.search_position("walker-1").await.expect("search");
        assert_eq!(position.geohash.len(), DEFAULT_GEOHASH_PRECISION);
        assert_eq!(
            store.user_position("walker-1").await,
            Some(walklink_core::GeoPoint::new(10.1, -84.2))
        );
    }

    #[tokio::test]
    async fn only_the_assigned_walker_may_stream() {
        let (hub, store) = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(64);
        let owner = hub.attach(identity("owner-1", Role::Owner), tx).await;
        hub.join_walk(&owner, "S123").await.expect("join");
        drain(&mut rx);

        hub.run_command(&owner, ClientCommand::UpdateLocation(sample("S123", 10.1)))
            .await;
        let frames = drain(&mut rx);
        assert!(events_named(&frames, "update_location").is_empty());
        let errors = events_named(&frames, "error");
        assert_eq!(errors[0]["data"]["message"], ONLY_WALKER);
        assert_eq!(errors[0]["data"]["code"], "authorization_failed");
        assert!(store.walk_locations("S123").await.is_empty());
    }

    #[tokio::test]
    async fn walk_not_in_progress_rejects_samples() {
        let (hub, _store) = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(64);
        let walker = hub.attach(identity("walker-1", Role::Walker), tx).await;
        drain(&mut rx);

        let err = hub
            .update_location(&walker, sample("S200", 10.1))
            .await
            .expect_err("confirmed walk");
        assert_eq!(err.to_string(), NOT_IN_PROGRESS);

        let err = hub
            .update_location(&walker, LocationPayload::default())
            .await
            .expect_err("empty payload");
        assert_eq!(err.code(), "validation_failed");
    }

    #[tokio::test]
    async fn burst_is_broadcast_in_full_but_written_once() {
        let (hub, store) = hub_with(Config::default());
        let (tx_o, mut rx_o) = mpsc::channel(64);
        let (tx_w, _rx_w) = mpsc::channel(64);
        let owner = hub.attach(identity("owner-1", Role::Owner), tx_o).await;
        let walker = hub.attach(identity("walker-1", Role::Walker), tx_w).await;
        hub.join_walk(&owner, "S123").await.expect("join");
        drain(&mut rx_o);

        for i in 0..5 {
            hub.update_location(&walker, sample("S123", 10.0 + i as f64 * 0.001))
                .await
                .expect("update");
        }
        assert_eq!(events_named(&drain(&mut rx_o), "update_location").len(), 5);
        assert_eq!(store.walk_locations("S123").await.len(), 1);
    }

    #[tokio::test]
    async fn stale_cache_picks_up_external_completion() {
        let config = Config {
            status_ttl: Duration::from_millis(20),
            ..Config::default()
        };
        let (hub, store) = hub_with(config);
        let (tx, _rx) = mpsc::channel(64);
        let walker = hub.attach(identity("walker-1", Role::Walker), tx).await;
        hub.update_location(&walker, sample("S123", 10.1))
            .await
            .expect("in progress");

        store
            .set_walk_status("S123", &WalkStatus::Completed, Utc::now())
            .await
            .expect("external change");
        tokio::time::sleep(Duration::from_millis(40)).await;

        let err = hub
            .update_location(&walker, sample("S123", 10.2))
            .await
            .expect_err("completed");
        assert_eq!(err.to_string(), NOT_IN_PROGRESS);
    }

    #[tokio::test]
    async fn status_change_broadcasts_and_invalidates_terminal_entries() {
        let (hub, store) = hub_with(Config::default());
        let (tx_o, mut rx_o) = mpsc::channel(64);
        let (tx_w, mut rx_w) = mpsc::channel(64);
        let owner = hub.attach(identity("owner-1", Role::Owner), tx_o).await;
        let walker = hub.attach(identity("walker-1", Role::Walker), tx_w).await;
        hub.join_walk(&owner, "S123").await.expect("join");
        hub.update_location(&walker, sample("S123", 10.1))
            .await
            .expect("warm cache");
        drain(&mut rx_o);
        drain(&mut rx_w);

        hub.change_walk_status(
            &walker,
            StatusChangePayload {
                walk_id: "S123".to_string(),
                new_status: "COMPLETADO".to_string(),
            },
        )
        .await
        .expect("complete");

        let frames = drain(&mut rx_o);
        let updated = events_named(&frames, "paseo_updated");
        assert_eq!(
            updated[0]["data"],
            json!({"paseoId": "S123", "estado": "COMPLETADO", "changedBy": "walker-1"})
        );
        assert!(hub.status_cache.get("S123").await.is_none());
        assert!(store
            .status_time("S123", "fecha_completado")
            .await
            .is_some());

        let err = hub
            .update_location(&walker, sample("S123", 10.2))
            .await
            .expect_err("completed");
        assert_eq!(err.to_string(), NOT_IN_PROGRESS);
    }

    #[tokio::test]
    async fn ended_walk_releases_the_write_window() {
        let (hub, store) = hub_with(Config::default());
        let (tx, _rx) = mpsc::channel(64);
        let walker = hub.attach(identity("walker-1", Role::Walker), tx).await;
        hub.update_location(&walker, sample("S123", 10.1))
            .await
            .expect("first sample");

        for new_status in ["CANCELADO", "EN_CURSO"] {
            hub.change_walk_status(
                &walker,
                StatusChangePayload {
                    walk_id: "S123".to_string(),
                    new_status: new_status.to_string(),
                },
            )
            .await
            .expect("status");
        }
        hub.update_location(&walker, sample("S123", 10.2))
            .await
            .expect("restarted walk");
        assert_eq!(store.walk_locations("S123").await.len(), 2);
    }

    #[tokio::test]
    async fn status_change_validates_value_and_participation() {
        let (hub, store) = hub_with(Config::default());
        let (tx, _rx) = mpsc::channel(64);
        let stranger = hub.attach(identity("owner-2", Role::Owner), tx).await;

        let err = hub
            .change_walk_status(
                &stranger,
                StatusChangePayload {
                    walk_id: "S123".to_string(),
                    new_status: "BAILANDO".to_string(),
                },
            )
            .await
            .expect_err("unknown status");
        assert_eq!(err.to_string(), INVALID_STATUS);

        let err = hub
            .change_walk_status(
                &stranger,
                StatusChangePayload {
                    walk_id: "S123".to_string(),
                    new_status: "CANCELADO".to_string(),
                },
            )
            .await
            .expect_err("not a participant");
        assert_eq!(err.to_string(), WALK_NOT_AUTHORIZED);
        let walk = store.get_walk("S123").await.expect("walk").expect("exists");
        assert_eq!(walk.status, WalkStatus::InProgress);
    }
}
