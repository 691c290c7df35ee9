use serde::{Deserialize, Serialize};

use super::reservation::{SeatCoordinate, SeatStatus};

/// Один переход статуса места, как он летит по Seat-Event Bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatUpdate {
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "zoneNumber")]
    pub zone_number: i32,
    pub row: i32,
    pub column: i32,
    pub status: SeatStatus,
    pub timestamp: i64,
}

impl SeatUpdate {
    pub fn new(event_id: impl Into<String>, seat: SeatCoordinate, status: SeatStatus, timestamp: i64) -> Self {
        Self {
            event_id: event_id.into(),
            zone_number: seat.zone_number,
            row: seat.row,
            column: seat.column,
            status,
            timestamp,
        }
    }
}

/// Пачка обновлений одного события — так Expiry Watcher сворачивает всплеск истечений
/// в одно сообщение на шине. Несёт собственный литерал `"type":"batch"`, тогда как
/// одиночный SeatUpdate на проводе никакого тега не имеет — оба значения решает
/// разобрать BusMessage::deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatUpdateBatch {
    #[serde(rename = "type")]
    pub kind: BatchTag,
    pub updates: Vec<SeatUpdate>,
}

impl SeatUpdateBatch {
    pub fn new(updates: Vec<SeatUpdate>) -> Self {
        Self { kind: BatchTag::Batch, updates }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BatchTag {
    #[serde(rename = "batch")]
    Batch,
}

/// Сообщение шины: либо одиночный переход, либо пачка. На проводе неразличимо без
/// структурного анализа — отсюда untagged и порядок вариантов (Single проверяется первым,
/// но проваливается на отсутствующих полях `status`/`timestamp`, так что двусмысленности нет).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusMessage {
    Single(SeatUpdate),
    Batch(SeatUpdateBatch),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(z: i32, r: i32, c: i32) -> SeatCoordinate {
        SeatCoordinate::new(z, r, c)
    }

    #[test]
    fn single_update_round_trips_through_json() {
        let update = SeatUpdate::new("E1", seat(1, 5, 10), SeatStatus::Pending, 1_700_000_000_000);
        let encoded = serde_json::to_string(&update).unwrap();
        let decoded: SeatUpdate = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.event_id, update.event_id);
        assert_eq!(decoded.zone_number, update.zone_number);
        assert_eq!(decoded.row, update.row);
        assert_eq!(decoded.column, update.column);
        assert_eq!(decoded.status, update.status);
        assert_eq!(decoded.timestamp, update.timestamp);
    }

    #[test]
    fn single_update_has_no_type_tag_on_the_wire() {
        let update = SeatUpdate::new("E1", seat(1, 5, 10), SeatStatus::Available, 0);
        let encoded = serde_json::to_value(&update).unwrap();
        assert!(encoded.get("type").is_none());
    }

    #[test]
    fn bus_message_untagged_round_trip_picks_the_right_variant() {
        let single = BusMessage::Single(SeatUpdate::new("E1", seat(1, 1, 1), SeatStatus::Reserved, 1));
        let encoded = serde_json::to_string(&single).unwrap();
        let decoded: BusMessage = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(decoded, BusMessage::Single(_)));

        let batch = BusMessage::Batch(SeatUpdateBatch::new(vec![
            SeatUpdate::new("E1", seat(1, 1, 1), SeatStatus::Available, 1),
            SeatUpdate::new("E1", seat(1, 1, 2), SeatStatus::Available, 1),
        ]));
        let encoded = serde_json::to_string(&batch).unwrap();
        assert!(encoded.contains("\"type\":\"batch\""));
        let decoded: BusMessage = serde_json::from_str(&encoded).unwrap();
        match decoded {
            BusMessage::Batch(b) => assert_eq!(b.updates.len(), 2),
            BusMessage::Single(_) => panic!("batch payload decoded as single update"),
        }
    }

    #[test]
    fn single_batch_emission_avoids_the_batch_wrapper() {
        // §9 open question: batched emission only when more than one seat transitions.
        let updates = vec![SeatUpdate::new("E1", seat(1, 1, 1), SeatStatus::Pending, 1)];
        assert_eq!(updates.len(), 1, "a one-seat operation should emit BusMessage::Single, not a batch");
    }
}
