//! auth::resolver
//!
//! Branch Authorization Resolver.
//!
//! Maps a credential to the set of branches a push under it may leave
//! modified. The function is pure and total: every credential resolves to
//! exactly one [`Restriction`], and nothing is looked up at call time.
//!
//! | Credential                          | Result                      |
//! |-------------------------------------|-----------------------------|
//! | operator (no association)           | `Unrestricted`              |
//! | agent, no unit of work              | `Denied(NoUnitOfWork)`      |
//! | agent, unit without assigned branch | `Denied(NoBranchAssigned)`  |
//! | agent, unit with branch `B`         | `RestrictedTo(B)`           |

use crate::core::types::{Credential, DenyReason, Restriction};

/// Resolve the branch restriction for `credential`.
///
/// # Example
///
/// ```
/// use mirrorgate::auth::resolve;
/// use mirrorgate::core::types::{Credential, Restriction};
///
/// assert_eq!(resolve(&Credential::operator("ops")), Restriction::Unrestricted);
/// ```
pub fn resolve(credential: &Credential) -> Restriction {
    let Some(association) = credential.association() else {
        return Restriction::Unrestricted;
    };
    match association.unit() {
        None => Restriction::Denied(DenyReason::NoUnitOfWork),
        Some(unit) => match unit.assigned_branch() {
            None => Restriction::Denied(DenyReason::NoBranchAssigned),
            Some(branch) => Restriction::RestrictedTo(branch.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Association, BranchName, UnitOfWork};

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    #[test]
    fn operator_is_unrestricted() {
        assert_eq!(
            resolve(&Credential::operator("ops")),
            Restriction::Unrestricted
        );
    }

    #[test]
    fn session_without_unit_is_denied() {
        let cred = Credential::agent(
            "agent",
            Association::Session {
                id: "s1".into(),
                unit: None,
            },
        );
        assert_eq!(
            resolve(&cred),
            Restriction::Denied(DenyReason::NoUnitOfWork)
        );
    }

    #[test]
    fn unit_without_branch_is_denied() {
        let cred = Credential::agent(
            "agent",
            Association::UnitOfWork(UnitOfWork::new("T1", "p")),
        );
        assert_eq!(
            resolve(&cred),
            Restriction::Denied(DenyReason::NoBranchAssigned)
        );
    }

    #[test]
    fn session_unit_without_branch_is_denied() {
        let cred = Credential::agent(
            "agent",
            Association::Session {
                id: "s1".into(),
                unit: Some(UnitOfWork::new("T1", "p")),
            },
        );
        assert_eq!(
            resolve(&cred),
            Restriction::Denied(DenyReason::NoBranchAssigned)
        );
    }

    #[test]
    fn assigned_branch_restricts() {
        let cred = Credential::agent(
            "agent",
            Association::UnitOfWork(UnitOfWork::with_branch("T1", "p", branch("feature/T1"))),
        );
        let restriction = resolve(&cred);
        assert_eq!(restriction, Restriction::RestrictedTo(branch("feature/T1")));
        assert!(restriction.permits(&branch("feature/T1")));
        assert!(!restriction.permits(&branch("main")));
    }

    #[test]
    fn session_inherits_unit_branch() {
        let cred = Credential::agent(
            "agent",
            Association::Session {
                id: "s1".into(),
                unit: Some(UnitOfWork::with_branch("T1", "p", branch("feature/T1"))),
            },
        );
        assert_eq!(
            resolve(&cred),
            Restriction::RestrictedTo(branch("feature/T1"))
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn branch_strategy() -> impl Strategy<Value = BranchName> {
            "[a-z][a-z0-9]{0,8}(/[a-z0-9]{1,8}){0,2}".prop_map(|s| BranchName::new(s).unwrap())
        }

        fn unit_strategy() -> impl Strategy<Value = UnitOfWork> {
            ("[A-Z][0-9]{1,3}", proptest::option::of(branch_strategy())).prop_map(
                |(id, branch)| match branch {
                    Some(b) => UnitOfWork::with_branch(id, "p", b),
                    None => UnitOfWork::new(id, "p"),
                },
            )
        }

        fn credential_strategy() -> impl Strategy<Value = Credential> {
            prop_oneof![
                Just(Credential::operator("ops")),
                unit_strategy()
                    .prop_map(|u| Credential::agent("agent", Association::UnitOfWork(u))),
                proptest::option::of(unit_strategy()).prop_map(|unit| Credential::agent(
                    "agent",
                    Association::Session {
                        id: "s".into(),
                        unit
                    }
                )),
            ]
        }

        proptest! {
            #[test]
            fn agents_never_unrestricted(cred in credential_strategy()) {
                let restriction = resolve(&cred);
                prop_assert_eq!(
                    cred.is_agent(),
                    restriction != Restriction::Unrestricted
                );
            }

            #[test]
            fn restricted_permits_exactly_one_branch(
                cred in credential_strategy(),
                other in branch_strategy(),
            ) {
                if let Restriction::RestrictedTo(allowed) = resolve(&cred) {
                    prop_assert!(resolve(&cred).permits(&allowed));
                    prop_assert_eq!(resolve(&cred).permits(&other), other == allowed);
                }
            }

            #[test]
            fn resolution_is_deterministic(cred in credential_strategy()) {
                prop_assert_eq!(resolve(&cred), resolve(&cred));
            }
        }
    }
}
