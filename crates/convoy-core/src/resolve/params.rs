//! Parameter trees exposed to expressions and templates during resolution.
//!
//! Expressions see labels at the top level plus lowercase `user`, `contract`,
//! `context` and `service` objects. Templates see capitalized `User`,
//! `Labels`, `Secrets`, `Contract`, `Context` and `Service`.

use crate::eval::{Param, Params};
use crate::external::User;
use crate::lang::LabelSet;

/// Names known at the current resolution step.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Scope<'a> {
    pub contract: Option<&'a str>,
    pub context: Option<&'a str>,
    pub service: Option<&'a str>,
}

pub(crate) fn expression_params(labels: &LabelSet, user: &User, scope: Scope<'_>) -> Params {
    let mut params = Params::with_labels(labels);
    params.insert(
        "user",
        Param::map()
            .with_str("id", &user.id)
            .with_str("name", &user.name)
            .with("labels", (&user.labels).into()),
    );
    insert_names(&mut params, scope, "contract", "context", "service", "name");
    params
}

pub(crate) fn template_params(
    labels: &LabelSet,
    user: &User,
    secrets: &LabelSet,
    scope: Scope<'_>,
) -> Params {
    let mut params = Params::new();
    params.insert(
        "User",
        Param::map()
            .with_str("ID", &user.id)
            .with_str("Name", &user.name)
            .with("Labels", (&user.labels).into()),
    );
    params.insert("Labels", labels.into());
    params.insert("Secrets", secrets.into());
    insert_names(&mut params, scope, "Contract", "Context", "Service", "Name");
    params
}

fn insert_names(
    params: &mut Params,
    scope: Scope<'_>,
    contract: &str,
    context: &str,
    service: &str,
    name: &str,
) {
    for (object, value) in [
        (contract, scope.contract),
        (context, scope.context),
        (service, scope.service),
    ] {
        if let Some(value) = value {
            params.insert(object, Param::map().with_str(name, value));
        }
    }
}
