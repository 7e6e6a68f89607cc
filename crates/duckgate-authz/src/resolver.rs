//! Effective privilege, row filter and column mask resolution.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use duckgate_core::{
    GatewayResult, Group, Principal, PrincipalType, Privilege, RbacStore, RowFilter, Securable,
    SecurableType,
};
use uuid::Uuid;

/// The principal together with every group reachable from it.
///
/// Computing the closure once per request keeps the number of store round
/// trips independent of how many tables a statement touches.
#[derive(Debug, Clone)]
pub struct AuthzContext {
    pub principal: Principal,
    /// Transitive group closure, ascending by name.
    pub groups: Vec<Group>,
}

impl AuthzContext {
    /// The principal itself first, then its groups in closure order.
    pub fn subjects(&self) -> impl Iterator<Item = (PrincipalType, Uuid)> + '_ {
        std::iter::once((PrincipalType::User, self.principal.id))
            .chain(self.groups.iter().map(|g| (PrincipalType::Group, g.id)))
    }

    pub fn is_admin(&self) -> bool {
        self.principal.is_admin
    }
}

/// Resolves what a principal may do against the RBAC store.
#[derive(Clone)]
pub struct AuthorizationResolver {
    store: Arc<dyn RbacStore>,
}

impl AuthorizationResolver {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// Transitive group closure of a principal.
    ///
    /// Membership may contain cycles, so this walks breadth-first with an
    /// explicit visited set. The result is sorted by group name.
    pub async fn group_closure(&self, principal: &Principal) -> GatewayResult<Vec<Group>> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut closure = Vec::new();
        let mut queue: VecDeque<Group> = self
            .store
            .groups_for_member(PrincipalType::User, principal.id)
            .await?
            .into();

        while let Some(group) = queue.pop_front() {
            if !visited.insert(group.id) {
                continue;
            }
            let parents = self
                .store
                .groups_for_member(PrincipalType::Group, group.id)
                .await?;
            queue.extend(parents.into_iter().filter(|p| !visited.contains(&p.id)));
            closure.push(group);
        }

        closure.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(closure)
    }

    /// Build the per-request context. Admins skip the store entirely.
    pub async fn context(&self, principal: &Principal) -> GatewayResult<AuthzContext> {
        let groups = if principal.is_admin {
            Vec::new()
        } else {
            self.group_closure(principal).await?
        };
        Ok(AuthzContext {
            principal: principal.clone(),
            groups,
        })
    }

    /// Privileges held on one securable through direct and group grants,
    /// with `ALL_PRIVILEGES` expanded to the full set.
    pub async fn effective_privileges(
        &self,
        principal: &Principal,
        securable_type: SecurableType,
        securable_id: Uuid,
    ) -> GatewayResult<BTreeSet<Privilege>> {
        if principal.is_admin {
            return Ok(Privilege::ALL.into_iter().collect());
        }
        let ctx = self.context(principal).await?;
        self.effective_privileges_in(&ctx, securable_type, securable_id)
            .await
    }

    pub async fn effective_privileges_in(
        &self,
        ctx: &AuthzContext,
        securable_type: SecurableType,
        securable_id: Uuid,
    ) -> GatewayResult<BTreeSet<Privilege>> {
        if ctx.is_admin() {
            return Ok(Privilege::ALL.into_iter().collect());
        }

        let mut privileges = BTreeSet::new();
        for (principal_type, principal_id) in ctx.subjects() {
            let granted = self
                .store
                .privileges(principal_type, principal_id, securable_type, securable_id)
                .await?;
            privileges.extend(granted);
        }

        if privileges.contains(&Privilege::AllPrivileges) {
            privileges.extend(Privilege::ALL);
        }
        Ok(privileges)
    }

    /// Whether the principal holds `privilege` on the securable or any of its
    /// ancestors. Store errors deny.
    pub async fn has_privilege(
        &self,
        principal: &Principal,
        securable: &Securable,
        privilege: Privilege,
    ) -> bool {
        if principal.is_admin {
            return true;
        }
        match self.context(principal).await {
            Ok(ctx) => self.has_privilege_in(&ctx, securable, privilege).await,
            Err(err) => {
                tracing::warn!(principal = %principal.name, error = %err, "group resolution failed, denying");
                false
            }
        }
    }

    pub async fn has_privilege_in(
        &self,
        ctx: &AuthzContext,
        securable: &Securable,
        privilege: Privilege,
    ) -> bool {
        if ctx.is_admin() {
            return true;
        }
        for (securable_type, securable_id) in securable.lineage() {
            match self
                .effective_privileges_in(ctx, securable_type, securable_id)
                .await
            {
                Ok(set) if set.contains(&privilege) => return true,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        principal = %ctx.principal.name,
                        securable_type = %securable_type,
                        securable_id = %securable_id,
                        privilege = %privilege,
                        error = %err,
                        "privilege lookup failed, denying"
                    );
                    return false;
                }
            }
        }
        false
    }

    /// Row filters bound to the principal or any of its groups, direct
    /// bindings first, deduplicated by filter id.
    pub async fn row_filters(
        &self,
        principal: &Principal,
        table_id: Uuid,
    ) -> GatewayResult<Vec<RowFilter>> {
        if principal.is_admin {
            return Ok(Vec::new());
        }
        let ctx = self.context(principal).await?;
        self.row_filters_in(&ctx, table_id).await
    }

    pub async fn row_filters_in(
        &self,
        ctx: &AuthzContext,
        table_id: Uuid,
    ) -> GatewayResult<Vec<RowFilter>> {
        if ctx.is_admin() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut filters = Vec::new();
        for (principal_type, principal_id) in ctx.subjects() {
            let mut bound = self
                .store
                .bound_row_filters(table_id, principal_type, principal_id)
                .await?;
            bound.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            for filter in bound {
                if seen.insert(filter.id) {
                    filters.push(filter);
                }
            }
        }
        Ok(filters)
    }

    /// Column masks that apply to the principal, keyed by column name.
    ///
    /// A masked column is exempt only when every applicable binding, direct
    /// or through any group, has `see_original`. When several masks on the
    /// same column apply, the one with the lowest id is used.
    pub async fn column_masks(
        &self,
        principal: &Principal,
        table_id: Uuid,
    ) -> GatewayResult<BTreeMap<String, String>> {
        if principal.is_admin {
            return Ok(BTreeMap::new());
        }
        let ctx = self.context(principal).await?;
        self.column_masks_in(&ctx, table_id).await
    }

    pub async fn column_masks_in(
        &self,
        ctx: &AuthzContext,
        table_id: Uuid,
    ) -> GatewayResult<BTreeMap<String, String>> {
        if ctx.is_admin() {
            return Ok(BTreeMap::new());
        }

        // column -> (every binding sees original, restrictive masks by id)
        let mut columns: BTreeMap<String, (bool, BTreeMap<Uuid, String>)> = BTreeMap::new();
        for (principal_type, principal_id) in ctx.subjects() {
            let bound = self
                .store
                .bound_column_masks(table_id, principal_type, principal_id)
                .await?;
            for binding in bound {
                let entry = columns
                    .entry(binding.mask.column_name.clone())
                    .or_insert_with(|| (true, BTreeMap::new()));
                if !binding.see_original {
                    entry.0 = false;
                    entry
                        .1
                        .insert(binding.mask.id, binding.mask.mask_expression.clone());
                }
            }
        }

        Ok(columns
            .into_iter()
            .filter_map(|(column, (all_see_original, masks))| {
                if all_see_original {
                    return None;
                }
                masks.into_values().next().map(|expr| (column, expr))
            })
            .collect())
    }
}
