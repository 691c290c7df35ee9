pub mod reservation;
pub mod seat_update;

pub use reservation::{
    ReservationHeader, ReservationStatus, ReservationView, SeatCoordinate, SeatStatus, TicketRow,
};
pub use seat_update::{BusMessage, SeatUpdate, SeatUpdateBatch};
