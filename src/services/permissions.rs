//! The compiled permissions value and its rules compiler
//!
//! A [`Permissions`] is built once per (auth, schema, rules, roles) input
//! and replaced wholesale whenever any of them change. The build inverts
//! the rules into a lookup keyed by `(relation, privilege)` so the decision
//! engine retrieves its candidate role-grants in constant time. Everything
//! except the write buffer is shared behind `Arc`, making the value cheap
//! to clone on every validated transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context as _;
use tracing::debug;
use uuid::Uuid;

use crate::config::PermissionsConfig;
use crate::models::{
    Auth, GrantSpec, Privilege, Relation, Role, RoleRecord, RulesSpec, SchemaInfo, TablePermission,
};
use crate::services::check::CompiledCheck;
use crate::services::triggers::TriggerTable;
use crate::services::write_buffer::WriteBuffer;

/// A compiled GRANT statement
#[derive(Debug, Clone)]
pub struct Grant {
    pub table: Relation,
    pub privilege: Privilege,
    pub role: String,
    /// Column subset the grant is restricted to; `None` allows all columns
    pub columns: Option<HashSet<String>>,
    pub check: Option<CompiledCheck>,
    pub scope: Option<Relation>,
}

impl Grant {
    fn compile(spec: &GrantSpec) -> anyhow::Result<Self> {
        let check = spec
            .check
            .as_ref()
            .map(CompiledCheck::compile)
            .transpose()
            .with_context(|| {
                format!(
                    "invalid CHECK on grant of {} on {} to {}",
                    spec.privilege, spec.table, spec.role
                )
            })?;
        Ok(Self {
            table: spec.table.clone(),
            privilege: spec.privilege,
            role: spec.role.clone(),
            columns: spec
                .columns
                .as_ref()
                .map(|cols| cols.iter().cloned().collect()),
            check,
            scope: spec.scope.clone(),
        })
    }

    /// Role-grant matching: the role's name must equal the grant's role
    /// name (the reserved names ANYONE and AUTHENTICATED bind to the
    /// synthetic variants), and the two sides must agree on scoping:
    /// both unscoped, or scoped to the same relation.
    pub fn matches_role(&self, role: &Role) -> bool {
        match role {
            Role::Anyone => self.scope.is_none() && self.role.eq_ignore_ascii_case("anyone"),
            Role::Authenticated { .. } => {
                self.scope.is_none() && self.role.eq_ignore_ascii_case("authenticated")
            }
            Role::Unscoped { role_name, .. } => self.scope.is_none() && role_name == &self.role,
            Role::Scoped {
                role_name, scope, ..
            } => role_name == &self.role && self.scope.as_ref() == Some(&scope.relation),
        }
    }

    /// Column rule: every provided column must be inside the grant's
    /// column subset, when one is defined.
    pub fn allows_columns<'a>(&self, mut provided: impl Iterator<Item = &'a String>) -> bool {
        match &self.columns {
            None => true,
            Some(allowed) => provided.all(|col| allowed.contains(col)),
        }
    }
}

/// A role paired with a grant it satisfies: the unit the decision engine
/// matches changes against.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub role: Role,
    pub grant: Arc<Grant>,
}

/// The candidates for one `(relation, privilege)` key, split so the
/// unscoped side can be tested without touching the graph.
#[derive(Debug, Clone, Default)]
pub struct AssignedRoles {
    pub scoped: Vec<RoleGrant>,
    pub unscoped: Vec<RoleGrant>,
}

impl AssignedRoles {
    pub fn is_empty(&self) -> bool {
        self.scoped.is_empty() && self.unscoped.is_empty()
    }
}

/// The raw inputs retained for rebuilds
#[derive(Debug, Clone, Default)]
pub struct RulesSource {
    pub rules: RulesSpec,
    pub roles: Vec<RoleRecord>,
}

/// Partial input to [`Permissions::update`]; absent fields keep their
/// previously supplied value.
#[derive(Debug, Clone, Default)]
pub struct PermissionsUpdate {
    pub schema: Option<SchemaInfo>,
    pub rules: Option<RulesSpec>,
    pub roles: Option<Vec<RoleRecord>>,
}

/// Compiled row-level permissions for one authenticated session.
///
/// Immutable after build apart from the write buffer, which is itself only
/// replaced, never mutated in place: `validate_write` returns a new value
/// and leaves its input untouched.
#[derive(Debug, Clone)]
pub struct Permissions {
    pub auth: Auth,
    pub(crate) config: Arc<PermissionsConfig>,
    pub(crate) schema: Arc<SchemaInfo>,
    pub(crate) source: Arc<RulesSource>,
    /// The hot lookup: `(relation, privilege)` to candidate role-grants
    pub(crate) roles: Arc<HashMap<TablePermission, AssignedRoles>>,
    pub(crate) grants: Arc<Vec<Arc<Grant>>>,
    /// Scoped roles grouped by their scope relation
    pub(crate) scoped_roles: Arc<HashMap<Relation, Vec<Role>>>,
    /// The scope relations the user holds roles in
    pub(crate) scopes: Arc<Vec<Relation>>,
    pub(crate) all_roles: Arc<Vec<Role>>,
    pub(crate) triggers: Arc<TriggerTable>,
    pub(crate) write_buffer: WriteBuffer,
    pub(crate) transient_lut: String,
}

impl Permissions {
    /// An empty permissions value: denies every write and filters every
    /// read until [`update`](Self::update) supplies rules.
    pub fn new(auth: Auth) -> Self {
        Self::with_config(auth, Arc::new(PermissionsConfig::default()))
    }

    pub fn with_config(auth: Auth, config: Arc<PermissionsConfig>) -> Self {
        let transient_lut = config.transient_store.clone();
        Self {
            auth,
            config,
            schema: Arc::new(SchemaInfo::default()),
            source: Arc::new(RulesSource::default()),
            roles: Arc::new(HashMap::new()),
            grants: Arc::new(Vec::new()),
            scoped_roles: Arc::new(HashMap::new()),
            scopes: Arc::new(Vec::new()),
            all_roles: Arc::new(Vec::new()),
            triggers: Arc::new(TriggerTable::default()),
            write_buffer: WriteBuffer::default(),
            transient_lut,
        }
    }

    /// Rebuild the lookup tables from changed inputs. The write buffer is
    /// carried over so pending client writes stay visible across a rules
    /// refresh.
    pub fn update(self, update: PermissionsUpdate) -> anyhow::Result<Self> {
        let schema = match update.schema {
            Some(schema) => Arc::new(schema),
            None => self.schema.clone(),
        };
        let source = Arc::new(RulesSource {
            rules: update.rules.unwrap_or_else(|| self.source.rules.clone()),
            roles: update.roles.unwrap_or_else(|| self.source.roles.clone()),
        });

        let compiled = compile(&self.auth, &schema, &source)?;
        debug!(
            grants = compiled.grants.len(),
            roles = compiled.all_roles.len(),
            buckets = compiled.roles.len(),
            "compiled permissions"
        );

        Ok(Self {
            auth: self.auth,
            config: self.config,
            schema,
            source,
            roles: Arc::new(compiled.roles),
            grants: Arc::new(compiled.grants),
            scoped_roles: Arc::new(compiled.scoped_roles),
            scopes: Arc::new(compiled.scopes),
            all_roles: Arc::new(compiled.all_roles),
            triggers: Arc::new(compiled.triggers),
            write_buffer: self.write_buffer,
            transient_lut: self.transient_lut,
        })
    }

    /// The roles the session currently holds, synthetic variants included
    pub fn assigned_roles(&self) -> &[Role] {
        &self.all_roles
    }

    /// Candidate role-grants for a `(relation, privilege)` pair. Mainly
    /// for diagnostics; the decision engine reads the table directly.
    pub fn candidates(&self, relation: &Relation, privilege: Privilege) -> Option<&AssignedRoles> {
        self.roles
            .get(&TablePermission::new(relation.clone(), privilege))
    }

    /// The scope relations the user holds scoped roles in
    pub fn scopes(&self) -> &[Relation] {
        &self.scopes
    }

    /// Scoped roles grouped by their scope relation
    pub fn scoped_roles(&self) -> &HashMap<Relation, Vec<Role>> {
        &self.scoped_roles
    }
}

struct CompiledTables {
    roles: HashMap<TablePermission, AssignedRoles>,
    grants: Vec<Arc<Grant>>,
    scoped_roles: HashMap<Relation, Vec<Role>>,
    scopes: Vec<Relation>,
    all_roles: Vec<Role>,
    triggers: TriggerTable,
}

/// The full compile: prune, inject, compile, match, invert, classify,
/// group, and build triggers.
fn compile(auth: &Auth, schema: &SchemaInfo, source: &RulesSource) -> anyhow::Result<CompiledTables> {
    // Stale assignment rows reference assigns that no longer exist; they
    // are dropped silently rather than rejected.
    let assign_ids: HashSet<Uuid> = source.rules.assigns.iter().map(|a| a.id).collect();

    let mut all_roles: Vec<Role> = vec![Role::Anyone];
    if let Some(user_id) = &auth.user_id {
        all_roles.push(Role::Authenticated {
            user_id: user_id.clone(),
        });
        for record in &source.roles {
            if !assign_ids.contains(&record.assign_id) {
                continue;
            }
            if let Some(role) = record.to_role(user_id) {
                all_roles.push(role);
            }
        }
    }

    let grants: Vec<Arc<Grant>> = source
        .rules
        .grants
        .iter()
        .map(|spec| Grant::compile(spec).map(Arc::new))
        .collect::<anyhow::Result<_>>()?;

    let mut roles: HashMap<TablePermission, AssignedRoles> = HashMap::new();
    let mut matched: Vec<&Role> = Vec::new();
    for role in &all_roles {
        let mut contributed = false;
        for grant in &grants {
            if !grant.matches_role(role) {
                continue;
            }
            contributed = true;
            let key = TablePermission::new(grant.table.clone(), grant.privilege);
            let bucket = roles.entry(key).or_default();
            let role_grant = RoleGrant {
                role: role.clone(),
                grant: grant.clone(),
            };
            if role.has_scope() {
                bucket.scoped.push(role_grant);
            } else {
                bucket.unscoped.push(role_grant);
            }
        }
        if contributed {
            matched.push(role);
        }
    }

    let mut scoped_roles: HashMap<Relation, Vec<Role>> = HashMap::new();
    for role in matched {
        if let Some(scope) = role.scope() {
            scoped_roles
                .entry(scope.relation.clone())
                .or_default()
                .push(role.clone());
        }
    }
    let scopes: Vec<Relation> = scoped_roles.keys().cloned().collect();

    let triggers = TriggerTable::compile(&source.rules.assigns, schema)?;

    Ok(CompiledTables {
        roles,
        grants,
        scoped_roles,
        scopes,
        all_roles,
        triggers,
    })
}
