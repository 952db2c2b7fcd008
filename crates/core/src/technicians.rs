use rand::seq::SliceRandom;

use crate::domain::booking::{Booking, TechnicianId};

/// Chooses which available technician is assigned on confirmation.
pub trait TechnicianSelector: Send + Sync {
    fn select(&self, booking: &Booking, candidates: &[TechnicianId]) -> Option<TechnicianId>;
}

/// Picks uniformly at random among the available technicians.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformRandomSelector;

impl TechnicianSelector for UniformRandomSelector {
    fn select(&self, _booking: &Booking, candidates: &[TechnicianId]) -> Option<TechnicianId> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Always picks the first candidate. Handy when assignment must be
/// reproducible.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstAvailableSelector;

impl TechnicianSelector for FirstAvailableSelector {
    fn select(&self, _booking: &Booking, candidates: &[TechnicianId]) -> Option<TechnicianId> {
        candidates.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{FirstAvailableSelector, TechnicianSelector, UniformRandomSelector};
    use crate::domain::booking::{
        Booking, BookingId, CustomerId, NewBooking, RepairType, TechnicianId, UrgencyLevel,
    };
    use crate::domain::device::DeviceModelId;
    use crate::money::Money;

    fn booking() -> Booking {
        Booking::open(
            BookingId("BK-1".to_owned()),
            NewBooking {
                customer_id: CustomerId("cust-1".to_owned()),
                device_model_id: DeviceModelId("pixel-8".to_owned()),
                repair_type: RepairType::BatteryReplacement,
                urgency: UrgencyLevel::Standard,
                scheduled_date: None,
                estimated_completion: None,
            },
            Money::from_major(80),
            Money::from_major(80),
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        )
        .expect("open booking")
    }

    #[test]
    fn random_selection_stays_within_candidates() {
        let candidates: Vec<_> =
            ["tech-1", "tech-2", "tech-3"].map(|id| TechnicianId(id.to_owned())).into();
        let booking = booking();

        for _ in 0..32 {
            let chosen = UniformRandomSelector.select(&booking, &candidates).expect("candidate");
            assert!(candidates.contains(&chosen));
        }
    }

    #[test]
    fn no_candidates_means_no_assignment() {
        assert_eq!(UniformRandomSelector.select(&booking(), &[]), None);
        assert_eq!(FirstAvailableSelector.select(&booking(), &[]), None);
    }
}
