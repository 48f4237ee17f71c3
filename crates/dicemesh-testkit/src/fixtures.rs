//! Test fixtures: deterministic identities and event builders.

use uuid::Uuid;

use dicemesh_core::{
    compute_event_id, roll_signed, ChatMessageBody, DiceMode, EventBody, EventId, EventRecord,
    FlagUpdateBody, IdentityKeypair, PeerId, PresenceBody, VectorClock,
};

/// A deterministic test identity with event builders.
pub struct TestFixture {
    pub keypair: IdentityKeypair,
    pub device_name: String,
}

impl TestFixture {
    /// Deterministic fixture from a one-byte seed.
    pub fn with_seed(seed: u8) -> Self {
        Self {
            keypair: IdentityKeypair::from_seed(&[seed; 32]),
            device_name: format!("fixture-{seed}"),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// Chat message body with a fresh message id.
    pub fn chat_body(&self, content: &str, after_event_id: Option<EventId>) -> EventBody {
        EventBody::ChatMessage(ChatMessageBody {
            message_id: Uuid::new_v4(),
            peer_id: self.peer_id(),
            device_name: self.device_name.clone(),
            content: content.to_string(),
            created_at: 1_700_000_000_000,
            after_event_id,
        })
    }

    /// Presence body for this fixture's peer.
    pub fn presence_body(&self, is_online: bool, version: u64, updated_at: i64) -> EventBody {
        EventBody::Presence(PresenceBody {
            peer_id: self.peer_id(),
            is_online,
            version,
            updated_at,
            device_name: self.device_name.clone(),
            change_id: Uuid::new_v4(),
            status: None,
        })
    }

    /// Flag write (or delete, with `value: None`).
    pub fn flag_body(&self, key: &str, value: Option<&str>, version: u64) -> EventBody {
        EventBody::FlagUpdate(FlagUpdateBody {
            key: key.to_string(),
            value: value.map(String::from),
            version,
            updated_at: 1_700_000_000_000 + version as i64,
            change_id: Uuid::new_v4(),
        })
    }

    /// A signed 1d20 roll.
    pub fn dice_body(&self) -> EventBody {
        let body = roll_signed(
            &mut rand::thread_rng(),
            &self.keypair,
            &self.device_name,
            1,
            20,
            0,
            DiceMode::Normal,
            1_700_000_000_000,
        )
        .expect("fixture roll is in bounds");
        EventBody::DiceRoll(body)
    }

    /// Assemble a complete record the way a producing replica would,
    /// given explicit clocks.
    pub fn make_event(
        &self,
        session_id: i64,
        lamport_clock: u64,
        parents: Vec<EventId>,
        vector_clock: VectorClock,
        body: EventBody,
    ) -> EventRecord {
        let event_id = compute_event_id(
            session_id,
            lamport_clock,
            lamport_clock as i64,
            &vector_clock,
            &parents,
            &body,
        )
        .expect("fixture body always encodes");
        EventRecord {
            event_id,
            session_id,
            kind: body.kind(),
            lamport_clock,
            timestamp: lamport_clock as i64,
            parents,
            vector_clock,
            body,
            is_imported: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicemesh_core::recompute_event_id;

    #[test]
    fn test_fixture_deterministic() {
        let a = TestFixture::with_seed(7);
        let b = TestFixture::with_seed(7);
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_made_event_id_verifies() {
        let fixture = TestFixture::with_seed(1);
        let clock = VectorClock::new().increment(&fixture.peer_id());
        let event = fixture.make_event(
            1,
            1,
            vec![],
            clock,
            fixture.flag_body("k", Some("v"), 1),
        );
        assert_eq!(recompute_event_id(&event).unwrap(), event.event_id);
    }
}
