use serde::Serialize;
use thiserror::Error;

pub const SPOT_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParkingSpot {
    index: usize,
    pub occupied: bool,
}

impl ParkingSpot {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarningLight {
    pub on: bool,
}

/// Pending or last sent display board text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Spot index {index} out of range 0..{}", SPOT_COUNT)]
pub struct OutOfRange {
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParkingSnapshot {
    pub spots: [ParkingSpot; SPOT_COUNT],
    pub warning_light: WarningLight,
    pub display_message: DisplayMessage,
}

impl ParkingSnapshot {
    pub fn available_spots(&self) -> usize {
        self.spots.iter().filter(|spot| !spot.occupied).count()
    }
}

/// Occupancy, warning light and board text.
///
/// Plain data: the bridge's dispatcher is the only owner and serializes all
/// calls. `toggle_spot` returns the spot's new occupancy, the setters return
/// whether the value actually changed.
#[derive(Debug, Clone)]
pub struct ParkingState {
    spots: [ParkingSpot; SPOT_COUNT],
    warning_light: WarningLight,
    display_message: DisplayMessage,
}

impl Default for ParkingState {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkingState {
    /// All spots free, warning light off, empty board.
    pub fn new() -> Self {
        Self {
            spots: std::array::from_fn(|index| ParkingSpot {
                index,
                occupied: false,
            }),
            warning_light: WarningLight::default(),
            display_message: DisplayMessage::default(),
        }
    }

    fn spot_mut(&mut self, index: usize) -> Result<&mut ParkingSpot, OutOfRange> {
        self.spots.get_mut(index).ok_or(OutOfRange { index })
    }

    /// Flips spot `index` and returns its new occupancy.
    pub fn toggle_spot(&mut self, index: usize) -> Result<bool, OutOfRange> {
        let spot = self.spot_mut(index)?;
        spot.occupied = !spot.occupied;
        Ok(spot.occupied)
    }

    pub fn set_spot(&mut self, index: usize, occupied: bool) -> Result<bool, OutOfRange> {
        let spot = self.spot_mut(index)?;
        let changed = spot.occupied != occupied;
        spot.occupied = occupied;
        Ok(changed)
    }

    pub fn set_all_spots(&mut self, occupied: [bool; SPOT_COUNT]) -> bool {
        let mut changed = false;
        for (spot, occupied) in self.spots.iter_mut().zip(occupied) {
            changed |= spot.occupied != occupied;
            spot.occupied = occupied;
        }
        changed
    }

    pub fn set_warning(&mut self, on: bool) -> bool {
        let changed = self.warning_light.on != on;
        self.warning_light.on = on;
        changed
    }

    pub fn set_display_message(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        let changed = self.display_message.text != text;
        self.display_message.text = text;
        changed
    }

    pub fn is_occupied(&self, index: usize) -> Result<bool, OutOfRange> {
        self.spots
            .get(index)
            .map(|spot| spot.occupied)
            .ok_or(OutOfRange { index })
    }

    pub fn snapshot(&self) -> ParkingSnapshot {
        ParkingSnapshot {
            spots: self.spots,
            warning_light: self.warning_light,
            display_message: self.display_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_twice_restores_every_spot() {
        for index in 0..SPOT_COUNT {
            let mut state = ParkingState::new();
            state.set_spot(2, true).unwrap();
            let before = state.snapshot();

            state.toggle_spot(index).unwrap();
            assert_ne!(state.snapshot(), before);
            state.toggle_spot(index).unwrap();
            assert_eq!(state.snapshot(), before);
        }
    }

    #[test]
    fn toggle_returns_new_occupancy() {
        let mut state = ParkingState::new();
        assert_eq!(state.toggle_spot(1), Ok(true));
        assert_eq!(state.is_occupied(1), Ok(true));
        assert_eq!(state.toggle_spot(1), Ok(false));
        assert_eq!(state.is_occupied(1), Ok(false));
    }

    #[test]
    fn out_of_range_mutates_nothing() {
        let mut state = ParkingState::new();
        let before = state.snapshot();

        assert_eq!(state.toggle_spot(SPOT_COUNT), Err(OutOfRange { index: SPOT_COUNT }));
        assert_eq!(state.set_spot(42, true), Err(OutOfRange { index: 42 }));
        assert!(state.is_occupied(7).is_err());
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn setters_report_changes() {
        let mut state = ParkingState::new();

        assert!(state.set_warning(true));
        assert!(!state.set_warning(true));
        assert!(state.set_display_message("Lot full"));
        assert!(!state.set_display_message("Lot full"));
        assert!(state.set_all_spots([true, true, false, false, true]));
        assert!(!state.set_all_spots([true, true, false, false, true]));

        let snapshot = state.snapshot();
        assert!(snapshot.warning_light.on);
        assert_eq!(snapshot.display_message.text, "Lot full");
        assert_eq!(snapshot.available_spots(), 2);
    }

    #[test]
    fn spot_indices_are_fixed() {
        let state = ParkingState::new();
        let indices: Vec<usize> = state.snapshot().spots.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }
}
