//! Policy resolver: dependencies + contracts + rules -> component graph.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use super::params::{Scope, expression_params, template_params};
use super::{
    ComponentInstance, ComponentInstanceKey, KeyParts, PolicyResolution, ROOT_COMPONENT,
    ResolvedCode,
};
use crate::error::{Error, Result};
use crate::eval::{EvalCache, Params, render_template};
use crate::event::EventLog;
use crate::external::{ExternalData, User};
use crate::lang::criteria::criteria_allows;
use crate::lang::{Code, Context, Contract, Dependency, LabelSet, Policy, Service, split_reference};

/// Resolves every dependency of a policy.
///
/// Dependencies are processed in namespace/name order. A dependency-scoped
/// failure (see [`Error::is_dependency_scoped`]) rolls back that dependency's
/// partial results, is recorded in the event log, and the pass continues.
/// Any other error aborts the pass.
pub struct PolicyResolver<'a> {
    policy: &'a Policy,
    external: &'a ExternalData,
    cache: Option<EvalCache>,
}

/// Per-dependency inputs that stay fixed during recursion.
struct Request<'r> {
    dependency: &'r str,
    user: &'r User,
    secrets: &'r LabelSet,
}

impl<'a> PolicyResolver<'a> {
    pub fn new(policy: &'a Policy, external: &'a ExternalData) -> Self {
        Self {
            policy,
            external,
            cache: Some(EvalCache::new()),
        }
    }

    /// Evaluate every expression and template from scratch.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn resolve_all_dependencies(&mut self) -> Result<(PolicyResolution, EventLog)> {
        let mut resolution = PolicyResolution::new();
        let mut log = EventLog::new();
        let mut failed = 0usize;

        for dependency in self.policy.dependencies() {
            let key = dependency.key();
            let checkpoint = resolution.clone();
            let mut branch_log = EventLog::new();

            match self.resolve_dependency(dependency, &mut resolution, &mut branch_log) {
                Ok(root) => {
                    log.append(branch_log);
                    log.info("dependency resolved")
                        .with("dependency", &key)
                        .with("instance", &root);
                    resolution.dependencies.insert(key, root);
                }
                Err(err) if err.is_dependency_scoped() => {
                    failed += 1;
                    warn!(dependency = %key, error = %err, "Cannot resolve dependency");
                    resolution = checkpoint;
                    log.append(branch_log);
                    log.error(format!("cannot resolve dependency: {}", err))
                        .with("dependency", &key);
                }
                Err(err) => return Err(err),
            }
        }

        resolution.finalize();
        info!(
            instances = resolution.len(),
            resolved = resolution.dependencies.len(),
            failed,
            "Policy resolved"
        );
        Ok((resolution, log))
    }

    fn resolve_dependency(
        &mut self,
        dependency: &Dependency,
        resolution: &mut PolicyResolution,
        log: &mut EventLog,
    ) -> Result<ComponentInstanceKey> {
        let user = self.external.user(&dependency.user)?;
        let secrets = self.external.secrets(&user.id)?;

        let mut labels = user.labels.clone();
        labels.merge(&dependency.labels);

        let key = dependency.key();
        let request = Request {
            dependency: &key,
            user: &user,
            secrets: &secrets,
        };
        let mut path = Vec::new();
        self.resolve_contract(
            &request,
            &dependency.contract,
            &dependency.metadata.namespace,
            labels,
            &mut path,
            resolution,
            log,
        )
    }

    /// Resolve one contract reference into the root instance of its allocated service.
    #[allow(clippy::too_many_arguments)]
    fn resolve_contract(
        &mut self,
        request: &Request<'_>,
        contract_ref: &str,
        current_namespace: &str,
        labels: LabelSet,
        path: &mut Vec<ComponentInstanceKey>,
        resolution: &mut PolicyResolution,
        log: &mut EventLog,
    ) -> Result<ComponentInstanceKey> {
        let policy = self.policy;
        let (contract_ns, _) = split_reference(contract_ref, current_namespace);
        let contract = policy
            .find_contract(contract_ref, current_namespace)
            .ok_or_else(|| Error::validation(format!("unknown contract '{}'", contract_ref)))?;
        let contract_id = format!("{}/{}", contract_ns, contract.metadata.name);

        let labels = contract.change_labels.apply_to(&labels);
        let (context, labels, service) =
            self.match_context(request, contract, &contract_id, contract_ns, labels)?;

        let scope = Scope {
            contract: Some(&contract.metadata.name),
            context: Some(&context.name),
            service: Some(&service.metadata.name),
        };
        let template = template_params(&labels, request.user, request.secrets, scope);
        let allocation_keys = context.resolve_keys(&template, self.cache.as_mut())?;

        let cluster = self.cluster_for(service, &labels)?;
        let parts = KeyParts {
            cluster,
            namespace: service.metadata.namespace.clone(),
            contract: contract.metadata.name.clone(),
            context: context.name.clone(),
            allocation_keys,
            service: service.metadata.name.clone(),
        };
        let root = parts.root();

        if path.contains(&root) {
            let mut cycle: Vec<String> = path.iter().map(|k| k.to_string()).collect();
            cycle.push(root.to_string());
            return Err(Error::CyclicDependency { path: cycle });
        }
        if resolution.contains(&root) {
            debug!(instance = %root, dependency = request.dependency, "Reusing component instance");
            resolution.add_dependency(&root, request.dependency);
            return Ok(root);
        }

        resolution.insert(new_instance(&parts, ROOT_COMPONENT, &labels, None));
        resolution.add_dependency(&root, request.dependency);
        log.debug("component instance created")
            .with("dependency", request.dependency)
            .with("instance", &root);
        debug!(instance = %root, dependency = request.dependency, "Created component instance");

        path.push(root.clone());
        let mut component_keys: HashMap<&str, ComponentInstanceKey> = HashMap::new();
        for component in service.components_in_order()? {
            let key = if let Some(nested) = &component.contract {
                self.resolve_contract(
                    request,
                    nested,
                    &service.metadata.namespace,
                    labels.clone(),
                    path,
                    resolution,
                    log,
                )?
            } else if let Some(code) = &component.code {
                let key = parts.component(&component.name);
                if resolution.contains(&key) {
                    resolution.add_dependency(&key, request.dependency);
                } else {
                    let resolved = self.render_code(code, &template)?;
                    resolution.insert(new_instance(&parts, &component.name, &labels, Some(resolved)));
                    resolution.add_dependency(&key, request.dependency);
                }
                for sibling in &component.dependencies {
                    if let Some(sibling_key) = component_keys.get(sibling.as_str()) {
                        resolution.add_edge(&key, sibling_key);
                    }
                }
                key
            } else {
                return Err(Error::validation(format!(
                    "component '{}' of service '{}' has neither contract nor code",
                    component.name, service.metadata.name
                )));
            };

            resolution.add_edge(&root, &key);
            component_keys.insert(&component.name, key);
        }
        path.pop();

        Ok(root)
    }

    /// Pick the first matching context, then apply context and rule label changes.
    fn match_context(
        &mut self,
        request: &Request<'_>,
        contract: &'a Contract,
        contract_id: &str,
        contract_ns: &str,
        labels: LabelSet,
    ) -> Result<(&'a Context, LabelSet, &'a Service)> {
        let policy = self.policy;
        let scope = Scope {
            contract: Some(&contract.metadata.name),
            ..Scope::default()
        };
        let params = expression_params(&labels, request.user, scope);
        let context = contract
            .find_matching_context(&params, self.cache.as_mut())?
            .ok_or_else(|| Error::NoMatchingContext {
                contract: contract_id.to_string(),
            })?;

        let service = policy
            .find_service(&context.allocation.service, contract_ns)
            .ok_or_else(|| {
                Error::validation(format!(
                    "context '{}' of contract '{}' allocates unknown service '{}'",
                    context.name, contract_id, context.allocation.service
                ))
            })?;

        let mut labels = context.change_labels.apply_to(&labels);
        let scope = Scope {
            contract: Some(&contract.metadata.name),
            context: Some(&context.name),
            service: Some(&service.metadata.name),
        };
        for rule in policy.rules_for(contract_ns) {
            let params = expression_params(&labels, request.user, scope);
            if !criteria_allows(rule.criteria.as_ref(), &params, self.cache.as_mut())? {
                continue;
            }
            if rule.actions.reject {
                return Err(Error::RejectedByRule {
                    rule: format!("{}/{}", rule.metadata.namespace, rule.metadata.name),
                });
            }
            labels = rule.actions.change_labels.apply_to(&labels);
        }

        let labels = service.change_labels.apply_to(&labels);
        Ok((context, labels, service))
    }

    fn cluster_for(&self, service: &Service, labels: &LabelSet) -> Result<String> {
        let name = service
            .cluster
            .as_deref()
            .or_else(|| labels.get("cluster"))
            .ok_or_else(|| Error::MissingCluster {
                service: service.metadata.name.clone(),
            })?;
        self.policy
            .cluster(name)
            .map(|c| c.metadata.name.clone())
            .ok_or_else(|| Error::ClusterNotFound {
                cluster: name.to_string(),
            })
    }

    fn render_code(&mut self, code: &Code, template: &Params) -> Result<ResolvedCode> {
        let mut params = BTreeMap::new();
        for (name, text) in &code.params {
            params.insert(name.clone(), render_template(text, template, self.cache.as_mut())?);
        }
        Ok(ResolvedCode {
            code_type: code.code_type,
            params,
        })
    }
}

fn new_instance(
    parts: &KeyParts,
    component: &str,
    labels: &LabelSet,
    code: Option<ResolvedCode>,
) -> ComponentInstance {
    ComponentInstance {
        key: parts.component(component),
        cluster: parts.cluster.clone(),
        namespace: parts.namespace.clone(),
        contract: parts.contract.clone(),
        context: parts.context.clone(),
        allocation_keys: parts.allocation_keys.clone(),
        service: parts.service.clone(),
        component: component.to_string(),
        labels: labels.clone(),
        code,
        depends_on: Default::default(),
        dependents: Default::default(),
        dependencies: Default::default(),
        checksum: String::new(),
    }
}
