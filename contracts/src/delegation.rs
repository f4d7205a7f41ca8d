//! # Delegation Graph
//!
//! Depositor → operator edges and the per-vault share totals each operator
//! carries.
//!
//! A depositor is either undelegated or delegated to exactly one operator.
//! Operators are always delegated to themselves and can never leave. The
//! graph keeps `operator_shares(op, v)` equal to the sum of positions in
//! `v` held by depositors delegated to `op`; the ledger feeds it every
//! position change through [`increase_operator_shares`] and
//! [`decrease_operator_shares`].
//!
//! Consent checks happen before the graph is touched; nothing in here
//! verifies signatures.
//!
//! [`increase_operator_shares`]: DelegationGraph::increase_operator_shares
//! [`decrease_operator_shares`]: DelegationGraph::decrease_operator_shares

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use keel_protocol::config::MAX_OPT_OUT_WINDOW;

use crate::error::ErrorKind;
use crate::types::{Address, VaultId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DelegationError {
    #[error("depositor {0} is already delegated")]
    AlreadyDelegated(String),

    #[error("depositor {0} is not delegated")]
    NotDelegated(String),

    #[error("operator {0} is not registered")]
    OperatorNotRegistered(String),

    #[error("{0} is already registered as an operator")]
    AlreadyOperator(String),

    #[error("caller is not the operator")]
    NotOperator,

    #[error("earnings receiver must not be the zero identity")]
    ZeroEarningsReceiver,

    #[error("opt-out window cannot decrease from {current} to {requested}")]
    OptOutWindowDecreased { current: u64, requested: u64 },

    #[error("opt-out window {0} exceeds the maximum")]
    OptOutWindowTooLong(u64),

    #[error("caller may not undelegate this depositor")]
    UnauthorizedCaller,

    #[error("operators cannot undelegate from themselves")]
    OperatorCannotUndelegate,

    #[error("operator share total out of range")]
    OperatorSharesOutOfRange,
}

impl DelegationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DelegationError::NotOperator | DelegationError::UnauthorizedCaller => {
                ErrorKind::Authorization
            }
            DelegationError::ZeroEarningsReceiver
            | DelegationError::OptOutWindowDecreased { .. }
            | DelegationError::OptOutWindowTooLong(_) => ErrorKind::Validation,
            _ => ErrorKind::State,
        }
    }
}

/// The mutable part of an operator profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDetails {
    pub earnings_receiver: Address,
    /// Identity that must consent to new delegations. Zero means open.
    pub delegation_approver: Address,
    /// Never decreases once set.
    pub opt_out_window: u64,
}

impl OperatorDetails {
    pub fn new(earnings_receiver: Address) -> Self {
        Self {
            earnings_receiver,
            delegation_approver: Address::ZERO,
            opt_out_window: 0,
        }
    }

    pub fn with_approver(mut self, approver: Address) -> Self {
        self.delegation_approver = approver;
        self
    }

    pub fn with_opt_out_window(mut self, window: u64) -> Self {
        self.opt_out_window = window;
        self
    }

    pub fn approver(&self) -> Option<Address> {
        (!self.delegation_approver.is_zero()).then_some(self.delegation_approver)
    }

    fn validate(&self) -> Result<(), DelegationError> {
        if self.earnings_receiver.is_zero() {
            return Err(DelegationError::ZeroEarningsReceiver);
        }
        if self.opt_out_window > MAX_OPT_OUT_WINDOW {
            return Err(DelegationError::OptOutWindowTooLong(self.opt_out_window));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorProfile {
    pub details: OperatorDetails,
    pub metadata_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationGraph {
    operators: BTreeMap<Address, OperatorProfile>,
    delegated_to: BTreeMap<Address, Address>,
    operator_shares: BTreeMap<(Address, VaultId), u64>,
}

impl DelegationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Queries ------------------------------------------------------------

    pub fn is_operator(&self, who: &Address) -> bool {
        self.operators.contains_key(who)
    }

    pub fn operator_profile(&self, operator: &Address) -> Option<&OperatorProfile> {
        self.operators.get(operator)
    }

    pub fn delegated_to(&self, depositor: &Address) -> Option<Address> {
        self.delegated_to.get(depositor).copied()
    }

    pub fn is_delegated(&self, depositor: &Address) -> bool {
        self.delegated_to.contains_key(depositor)
    }

    pub fn operator_shares(&self, operator: &Address, vault: &VaultId) -> u64 {
        self.operator_shares
            .get(&(*operator, *vault))
            .copied()
            .unwrap_or(0)
    }

    pub fn operators(&self) -> impl Iterator<Item = &Address> {
        self.operators.keys()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&Address, &Address)> {
        self.delegated_to.iter()
    }

    pub fn iter_operator_shares(&self) -> impl Iterator<Item = (&Address, &VaultId, u64)> {
        self.operator_shares.iter().map(|((o, v), s)| (o, v, *s))
    }

    /// The approver whose consent `caller` needs to delegate `depositor` to
    /// `operator`, if any. The depositor acting directly, the approver and
    /// the operator need none.
    pub fn required_approver(
        &self,
        operator: &Address,
        depositor: &Address,
        caller: &Address,
    ) -> Option<Address> {
        let approver = self.operators.get(operator)?.details.approver()?;
        let exempt = caller == depositor || *caller == approver || caller == operator;
        (!exempt).then_some(approver)
    }

    // -- Operators ----------------------------------------------------------

    /// Record a new operator and delegate it to itself, carrying `positions`.
    pub fn register_operator(
        &mut self,
        operator: Address,
        details: OperatorDetails,
        metadata_uri: String,
        positions: &[(VaultId, u64)],
    ) -> Result<(), DelegationError> {
        if self.is_operator(&operator) {
            return Err(DelegationError::AlreadyOperator(operator.to_hex()));
        }
        if self.is_delegated(&operator) {
            return Err(DelegationError::AlreadyDelegated(operator.to_hex()));
        }
        details.validate()?;
        self.operators.insert(
            operator,
            OperatorProfile {
                details,
                metadata_uri,
            },
        );
        self.delegate(operator, operator, positions)
    }

    pub fn modify_operator_details(
        &mut self,
        operator: &Address,
        details: OperatorDetails,
    ) -> Result<(), DelegationError> {
        let profile = self
            .operators
            .get_mut(operator)
            .ok_or(DelegationError::NotOperator)?;
        details.validate()?;
        if details.opt_out_window < profile.details.opt_out_window {
            return Err(DelegationError::OptOutWindowDecreased {
                current: profile.details.opt_out_window,
                requested: details.opt_out_window,
            });
        }
        profile.details = details;
        Ok(())
    }

    pub fn update_metadata_uri(
        &mut self,
        operator: &Address,
        uri: String,
    ) -> Result<(), DelegationError> {
        let profile = self
            .operators
            .get_mut(operator)
            .ok_or(DelegationError::NotOperator)?;
        profile.metadata_uri = uri;
        Ok(())
    }

    // -- Edges --------------------------------------------------------------

    /// Point `depositor` at `operator` and credit their current positions.
    pub fn delegate(
        &mut self,
        depositor: Address,
        operator: Address,
        positions: &[(VaultId, u64)],
    ) -> Result<(), DelegationError> {
        if self.is_delegated(&depositor) {
            return Err(DelegationError::AlreadyDelegated(depositor.to_hex()));
        }
        if !self.is_operator(&operator) {
            return Err(DelegationError::OperatorNotRegistered(operator.to_hex()));
        }
        self.delegated_to.insert(depositor, operator);
        for (vault, shares) in positions {
            self.increase_operator_shares(&depositor, vault, *shares)?;
        }
        Ok(())
    }

    /// Check that `caller` may undelegate `depositor`, returning the operator.
    pub fn check_undelegate(
        &self,
        depositor: &Address,
        caller: &Address,
    ) -> Result<Address, DelegationError> {
        let operator = self
            .delegated_to(depositor)
            .ok_or_else(|| DelegationError::NotDelegated(depositor.to_hex()))?;
        if self.is_operator(depositor) {
            return Err(DelegationError::OperatorCannotUndelegate);
        }
        let approver = self
            .operators
            .get(&operator)
            .and_then(|p| p.details.approver());
        if caller != depositor && *caller != operator && Some(*caller) != approver {
            return Err(DelegationError::UnauthorizedCaller);
        }
        Ok(operator)
    }

    /// Drop the depositor's edge. Operator totals must already be debited.
    pub fn clear_delegation(&mut self, depositor: &Address) -> Result<Address, DelegationError> {
        self.delegated_to
            .remove(depositor)
            .ok_or_else(|| DelegationError::NotDelegated(depositor.to_hex()))
    }

    /// Credit `shares` to the depositor's operator. Returns the operator
    /// credited, or `None` if the depositor is undelegated.
    pub fn increase_operator_shares(
        &mut self,
        depositor: &Address,
        vault: &VaultId,
        shares: u64,
    ) -> Result<Option<Address>, DelegationError> {
        let Some(operator) = self.delegated_to(depositor) else {
            return Ok(None);
        };
        let entry = self.operator_shares.entry((operator, *vault)).or_insert(0);
        *entry = entry
            .checked_add(shares)
            .ok_or(DelegationError::OperatorSharesOutOfRange)?;
        debug!(%operator, %vault, shares, total = *entry, "operator shares increased");
        Ok(Some(operator))
    }

    /// Debit `shares` from the depositor's operator. No-op while undelegated.
    pub fn decrease_operator_shares(
        &mut self,
        depositor: &Address,
        vault: &VaultId,
        shares: u64,
    ) -> Result<Option<Address>, DelegationError> {
        let Some(operator) = self.delegated_to(depositor) else {
            return Ok(None);
        };
        let key = (operator, *vault);
        let current = self.operator_shares.get(&key).copied().unwrap_or(0);
        let remaining = current
            .checked_sub(shares)
            .ok_or(DelegationError::OperatorSharesOutOfRange)?;
        if remaining == 0 {
            self.operator_shares.remove(&key);
        } else {
            self.operator_shares.insert(key, remaining);
        }
        debug!(%operator, %vault, shares, total = remaining, "operator shares decreased");
        Ok(Some(operator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(label: &str) -> Address {
        Address::from_label(label)
    }

    fn graph_with_operator(op: &str) -> DelegationGraph {
        let mut g = DelegationGraph::new();
        g.register_operator(a(op), OperatorDetails::new(a("earnings")), String::new(), &[])
            .unwrap();
        g
    }

    #[test]
    fn registration_self_delegates() {
        let g = graph_with_operator("op");
        assert!(g.is_operator(&a("op")));
        assert_eq!(g.delegated_to(&a("op")), Some(a("op")));
    }

    #[test]
    fn registration_rules() {
        let mut g = graph_with_operator("op");
        assert!(matches!(
            g.register_operator(a("op"), OperatorDetails::new(a("e")), String::new(), &[]),
            Err(DelegationError::AlreadyOperator(_))
        ));
        assert_eq!(
            g.register_operator(a("x"), OperatorDetails::new(Address::ZERO), String::new(), &[]),
            Err(DelegationError::ZeroEarningsReceiver)
        );
        let too_long = OperatorDetails::new(a("e")).with_opt_out_window(MAX_OPT_OUT_WINDOW + 1);
        assert!(matches!(
            g.register_operator(a("x"), too_long, String::new(), &[]),
            Err(DelegationError::OptOutWindowTooLong(_))
        ));

        g.delegate(a("alice"), a("op"), &[]).unwrap();
        assert!(matches!(
            g.register_operator(a("alice"), OperatorDetails::new(a("e")), String::new(), &[]),
            Err(DelegationError::AlreadyDelegated(_))
        ));
    }

    #[test]
    fn delegate_to_unregistered_operator_fails() {
        let mut g = DelegationGraph::new();
        let err = g.delegate(a("alice"), a("nobody"), &[]).unwrap_err();
        assert!(matches!(err, DelegationError::OperatorNotRegistered(_)));
        assert!(!g.is_delegated(&a("alice")));
    }

    #[test]
    fn delegation_carries_positions() {
        let mut g = graph_with_operator("op");
        g.delegate(a("alice"), a("op"), &[(a("v1"), 10), (a("v2"), 5)])
            .unwrap();
        assert_eq!(g.operator_shares(&a("op"), &a("v1")), 10);
        assert_eq!(g.operator_shares(&a("op"), &a("v2")), 5);

        g.decrease_operator_shares(&a("alice"), &a("v1"), 10).unwrap();
        assert_eq!(g.operator_shares(&a("op"), &a("v1")), 0);
        assert_eq!(
            g.decrease_operator_shares(&a("alice"), &a("v1"), 1),
            Err(DelegationError::OperatorSharesOutOfRange)
        );
    }

    #[test]
    fn undelegated_share_changes_are_noops() {
        let mut g = DelegationGraph::new();
        assert_eq!(g.increase_operator_shares(&a("bob"), &a("v"), 5), Ok(None));
        assert_eq!(g.decrease_operator_shares(&a("bob"), &a("v"), 5), Ok(None));
    }

    #[test]
    fn opt_out_window_never_decreases() {
        let mut g = DelegationGraph::new();
        let details = OperatorDetails::new(a("e")).with_opt_out_window(100);
        g.register_operator(a("op"), details.clone(), String::new(), &[])
            .unwrap();
        assert!(matches!(
            g.modify_operator_details(&a("op"), details.clone().with_opt_out_window(99)),
            Err(DelegationError::OptOutWindowDecreased { .. })
        ));
        g.modify_operator_details(&a("op"), details.with_opt_out_window(200))
            .unwrap();
        assert_eq!(
            g.modify_operator_details(&a("alice"), OperatorDetails::new(a("e"))),
            Err(DelegationError::NotOperator)
        );
    }

    #[test]
    fn undelegate_caller_rules() {
        let mut g = DelegationGraph::new();
        let details = OperatorDetails::new(a("e")).with_approver(a("approver"));
        g.register_operator(a("op"), details, String::new(), &[])
            .unwrap();
        g.delegate(a("alice"), a("op"), &[]).unwrap();

        for caller in ["alice", "op", "approver"] {
            assert_eq!(g.check_undelegate(&a("alice"), &a(caller)), Ok(a("op")));
        }
        assert_eq!(
            g.check_undelegate(&a("alice"), &a("mallory")),
            Err(DelegationError::UnauthorizedCaller)
        );
        assert_eq!(
            g.check_undelegate(&a("op"), &a("op")),
            Err(DelegationError::OperatorCannotUndelegate)
        );
        assert!(matches!(
            g.check_undelegate(&a("bob"), &a("bob")),
            Err(DelegationError::NotDelegated(_))
        ));
    }

    #[test]
    fn approver_requirement() {
        let mut g = DelegationGraph::new();
        g.register_operator(
            a("gated"),
            OperatorDetails::new(a("e")).with_approver(a("approver")),
            String::new(),
            &[],
        )
        .unwrap();
        g.register_operator(a("open"), OperatorDetails::new(a("e")), String::new(), &[])
            .unwrap();

        let (gated, alice, relayer) = (a("gated"), a("alice"), a("relayer"));
        assert_eq!(
            g.required_approver(&gated, &alice, &relayer),
            Some(a("approver"))
        );
        assert_eq!(g.required_approver(&gated, &alice, &alice), None);
        assert_eq!(g.required_approver(&gated, &alice, &a("approver")), None);
        assert_eq!(g.required_approver(&gated, &alice, &gated), None);
        assert_eq!(g.required_approver(&a("open"), &alice, &relayer), None);
    }
}
