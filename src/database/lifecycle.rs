use anyhow::{bail, Result};
use serde::Serialize;

/// Where a store handle is in its life: `Closed → Validating → Migrating → Open → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Closed,
    Validating,
    Migrating,
    Open,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Validating => write!(f, "validating"),
            Self::Migrating => write!(f, "migrating"),
            Self::Open => write!(f, "open"),
        }
    }
}

impl StoreState {
    pub fn can_advance_to(self, next: StoreState) -> bool {
        use StoreState::*;
        matches!(
            (self, next),
            (Closed, Validating)
                | (Validating, Migrating)
                | (Validating, Closed)
                | (Migrating, Open)
                | (Migrating, Closed)
                | (Open, Closed)
        )
    }
}

/// Tracks the current state and rejects out-of-order transitions.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: StoreState,
}

impl Lifecycle {
    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn advance(&mut self, next: StoreState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            bail!("store cannot go from {} to {}", self.state, next);
        }
        log::debug!("Store {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lc = Lifecycle::default();
        assert_eq!(lc.state(), StoreState::Closed);
        lc.advance(StoreState::Validating).unwrap();
        lc.advance(StoreState::Migrating).unwrap();
        lc.advance(StoreState::Open).unwrap();
        lc.advance(StoreState::Closed).unwrap();
    }

    #[test]
    fn test_cannot_skip_validation() {
        let mut lc = Lifecycle::default();
        assert!(lc.advance(StoreState::Open).is_err());
        assert_eq!(lc.state(), StoreState::Closed);
    }

    #[test]
    fn test_failed_validation_returns_to_closed() {
        let mut lc = Lifecycle::default();
        lc.advance(StoreState::Validating).unwrap();
        lc.advance(StoreState::Closed).unwrap();
        assert!(lc.advance(StoreState::Migrating).is_err());
    }
}
