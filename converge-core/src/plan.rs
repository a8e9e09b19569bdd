//! Turning diffs into remote operations, subject to lifecycle policy.

use std::{collections::BTreeSet, fmt::Display};

use tokio_util::sync::CancellationToken;

use crate::{
    diff::FieldDiff,
    error::ApplyInfeasibleError,
    schema::OperationKind,
    Node,
};

/// Caller policy restricting what apply may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleDirective {
    /// Fail instead of creating a resource that does not exist.
    BlockCreation,
    /// Fail instead of taking over a resource that already exists.
    BlockAcquire,
    /// Fail instead of changing an existing resource.
    BlockModification,
}

/// Per-call options of [`crate::Client::apply`] and [`crate::Client::plan`].
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub lifecycle: BTreeSet<LifecycleDirective>,
    /// Replace the resource when a field that cannot change in place differs.
    pub allow_recreate: bool,
    /// A previously known copy of the resource. Its identity fields address
    /// the initial fetch.
    pub state_hint: Option<Node>,
    pub cancel: Option<CancellationToken>,
}

impl ApplyOptions {
    pub fn with_directive(mut self, directive: LifecycleDirective) -> Self {
        self.lifecycle.insert(directive);
        self
    }

    pub fn has(&self, directive: LifecycleDirective) -> bool {
        self.lifecycle.contains(&directive)
    }
}

/// An in-place update, carrying the diffs that called for it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation<K: 'static> {
    pub kind: K,
    pub diffs: Vec<FieldDiff<K>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation<K: 'static> {
    Create,
    Delete,
    Update(UpdateOperation<K>),
}

impl<K: OperationKind> Operation<K> {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Update(update) => update.kind.name(),
        }
    }
}

impl<K: OperationKind> Display for Operation<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Update(update) => {
                let paths: Vec<String> = update.diffs.iter().map(|d| d.path.to_string()).collect();
                write!(f, "{} [{}]", update.kind.name(), paths.join(", "))
            }
            op => write!(f, "{}", op.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan<K: 'static> {
    /// Executed in order.
    pub operations: Vec<Operation<K>>,
    pub diffs: Vec<FieldDiff<K>>,
}

impl<K: OperationKind> Plan<K> {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn creates(&self) -> bool {
        self.operations.contains(&Operation::Create)
    }
}

impl<K: OperationKind> Display for Plan<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "no changes");
        }
        let ops: Vec<String> = self.operations.iter().map(ToString::to_string).collect();
        write!(f, "{}", ops.join("; "))
    }
}

/// Decide the operations that reconcile `diffs`.
///
/// Without an initial state the plan is a single create. An existing
/// resource is updated in place, one operation per distinct operation kind,
/// ordered by the first diff that triggered it. A diff that cannot be
/// applied in place is infeasible unless the caller allowed recreation.
pub fn plan<K: OperationKind>(
    initial_exists: bool,
    diffs: Vec<FieldDiff<K>>,
    options: &ApplyOptions,
) -> Result<Plan<K>, ApplyInfeasibleError> {
    if !initial_exists {
        if options.has(LifecycleDirective::BlockCreation) {
            return Err(ApplyInfeasibleError::CreationBlocked);
        }
        return Ok(Plan {
            operations: vec![Operation::Create],
            diffs,
        });
    }
    if options.has(LifecycleDirective::BlockAcquire) {
        return Err(ApplyInfeasibleError::AcquireBlocked);
    }
    if diffs.is_empty() {
        return Ok(Plan {
            operations: Vec::new(),
            diffs,
        });
    }

    let recreate: Vec<String> = diffs
        .iter()
        .filter(|d| d.requires_recreate())
        .map(|d| d.path.to_string())
        .collect();
    if !recreate.is_empty() && !options.allow_recreate {
        return Err(ApplyInfeasibleError::RecreateRequired { fields: recreate });
    }
    if options.has(LifecycleDirective::BlockModification) {
        if !recreate.is_empty() {
            return Err(ApplyInfeasibleError::RecreateBlocked {
                fields: recreate,
                directive: LifecycleDirective::BlockModification,
            });
        }
        return Err(ApplyInfeasibleError::ModificationBlocked {
            diffs: diffs.iter().map(ToString::to_string).collect(),
        });
    }
    if !recreate.is_empty() {
        if options.has(LifecycleDirective::BlockCreation) {
            return Err(ApplyInfeasibleError::RecreateBlocked {
                fields: recreate,
                directive: LifecycleDirective::BlockCreation,
            });
        }
        return Ok(Plan {
            operations: vec![Operation::Delete, Operation::Create],
            diffs,
        });
    }

    let mut updates: Vec<UpdateOperation<K>> = Vec::new();
    for diff in &diffs {
        for kind in diff.resulting.operations() {
            match updates.iter_mut().find(|u| u.kind == *kind) {
                Some(update) => update.diffs.push(diff.clone()),
                None => updates.push(UpdateOperation {
                    kind: *kind,
                    diffs: vec![diff.clone()],
                }),
            }
        }
    }
    Ok(Plan {
        operations: updates.into_iter().map(Operation::Update).collect(),
        diffs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diff::FieldPath,
        schema::{tests::TestOp, OperationSelector},
    };

    fn diff(path: &str, resulting: OperationSelector<TestOp>) -> FieldDiff<TestOp> {
        FieldDiff {
            path: FieldPath::parse(path),
            desired: Some("d".into()),
            actual: Some("a".into()),
            resulting,
        }
    }

    const SPEC: OperationSelector<TestOp> = OperationSelector::Triggers(&[TestOp::UpdateSpec]);
    const LABELS: OperationSelector<TestOp> =
        OperationSelector::Triggers(&[TestOp::UpdateLabels]);
    const BOTH: OperationSelector<TestOp> =
        OperationSelector::Triggers(&[TestOp::UpdateLabels, TestOp::UpdateSpec]);

    #[test]
    fn missing_resource_is_created() {
        let plan = plan::<TestOp>(false, vec![], &ApplyOptions::default()).unwrap();
        assert_eq!(plan.operations, vec![Operation::Create]);
        assert!(plan.creates());

        let blocked = ApplyOptions::default().with_directive(LifecycleDirective::BlockCreation);
        assert_eq!(
            super::plan::<TestOp>(false, vec![], &blocked).unwrap_err(),
            ApplyInfeasibleError::CreationBlocked
        );
    }

    #[test]
    fn existing_resource_without_diffs_is_a_noop() {
        let plan = plan::<TestOp>(true, vec![], &ApplyOptions::default()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "no changes");
    }

    #[test]
    fn acquire_can_be_blocked() {
        let options = ApplyOptions::default().with_directive(LifecycleDirective::BlockAcquire);
        assert_eq!(
            plan::<TestOp>(true, vec![], &options).unwrap_err(),
            ApplyInfeasibleError::AcquireBlocked
        );
    }

    #[test]
    fn diffs_group_by_operation_in_first_seen_order() {
        let diffs = vec![
            diff("labels", LABELS),
            diff("spec.color", SPEC),
            diff("tags", BOTH),
        ];
        let plan = plan(true, diffs, &ApplyOptions::default()).unwrap();
        assert_eq!(plan.operations.len(), 2);
        assert_eq!(plan.to_string(), "updateLabels [labels, tags]; updateSpec [spec.color, tags]");
    }

    #[test]
    fn recreate_short_circuits_updates() {
        let diffs = vec![
            diff("description", SPEC),
            diff("network", OperationSelector::RequiresRecreate),
        ];
        let err = plan(true, diffs.clone(), &ApplyOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ApplyInfeasibleError::RecreateRequired {
                fields: vec!["network".to_string()]
            }
        );

        let allow = ApplyOptions {
            allow_recreate: true,
            ..Default::default()
        };
        let plan_ok = plan(true, diffs.clone(), &allow).unwrap();
        assert_eq!(
            plan_ok.operations,
            vec![Operation::Delete, Operation::Create]
        );

        let blocked = allow.clone().with_directive(LifecycleDirective::BlockCreation);
        assert!(matches!(
            plan(true, diffs, &blocked),
            Err(ApplyInfeasibleError::RecreateBlocked {
                directive: LifecycleDirective::BlockCreation,
                ..
            })
        ));
    }

    #[test]
    fn modification_can_be_blocked() {
        let options = ApplyOptions::default().with_directive(LifecycleDirective::BlockModification);
        let err = plan(true, vec![diff("description", SPEC)], &options).unwrap_err();
        assert!(matches!(err, ApplyInfeasibleError::ModificationBlocked { .. }));
        assert!(plan::<TestOp>(true, vec![], &options).unwrap().is_empty());
    }
}
