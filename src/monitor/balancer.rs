use diesel::prelude::*;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::AppResult;
use crate::shared::models::{Account, AccountStatus};
use crate::shared::state::AppState;

/// Balanced assignment of groups to accounts: every group lands on
/// exactly one account, counts stay within ±1 of each other, ties break
/// toward the lower account id, and existing placements move only when
/// balance or membership forces it.
pub fn compute_assignments(
    group_ids: &[Uuid],
    account_ids: &[Uuid],
    current: &HashMap<Uuid, Vec<Uuid>>,
) -> HashMap<Uuid, Vec<Uuid>> {
    let mut assignments: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    if account_ids.is_empty() {
        return assignments;
    }

    let mut accounts: Vec<Uuid> = account_ids.to_vec();
    accounts.sort();
    accounts.dedup();
    for account in &accounts {
        assignments.insert(*account, Vec::new());
    }

    let group_set: HashSet<Uuid> = group_ids.iter().copied().collect();
    let mut claimed: HashSet<Uuid> = HashSet::new();

    // Keep every still-valid placement.
    for account in &accounts {
        if let Some(existing) = current.get(account) {
            let kept = assignments.get_mut(account).expect("account present");
            for group in existing {
                if group_set.contains(group) && claimed.insert(*group) {
                    kept.push(*group);
                }
            }
        }
    }

    // Place orphaned groups on the emptiest account.
    let mut unassigned: Vec<Uuid> = group_set.difference(&claimed).copied().collect();
    unassigned.sort();
    for group in unassigned {
        let target = *accounts
            .iter()
            .min_by_key(|a| (assignments[*a].len(), **a))
            .expect("at least one account");
        assignments.get_mut(&target).expect("account present").push(group);
    }

    // Shave overloaded accounts until the spread is at most one.
    loop {
        let max_account = *accounts
            .iter()
            .max_by_key(|a| (assignments[*a].len(), std::cmp::Reverse(**a)))
            .expect("at least one account");
        let min_account = *accounts
            .iter()
            .min_by_key(|a| (assignments[*a].len(), **a))
            .expect("at least one account");

        if assignments[&max_account].len() <= assignments[&min_account].len() + 1 {
            break;
        }

        let moved = assignments
            .get_mut(&max_account)
            .expect("account present")
            .pop()
            .expect("overloaded account is non-empty");
        assignments
            .get_mut(&min_account)
            .expect("account present")
            .push(moved);
    }

    assignments
}

/// Recomputes the tenant's group-to-account assignment and pushes the
/// result into the store and the running receivers.
pub async fn rebalance_tenant(state: &Arc<AppState>, tenant: Uuid) -> AppResult<()> {
    use crate::shared::models::schema::accounts::dsl as accounts_dsl;
    use crate::shared::models::schema::groups::dsl as groups_dsl;

    let (group_rows, account_rows) = {
        let mut conn = state.conn.get()?;
        let group_rows: Vec<(Uuid, String)> = groups_dsl::groups
            .filter(groups_dsl::tenant_id.eq(tenant))
            .filter(groups_dsl::is_active.eq(true))
            .select((groups_dsl::id, groups_dsl::group_id))
            .load(&mut conn)?;
        let account_rows: Vec<Account> = accounts_dsl::accounts
            .filter(accounts_dsl::tenant_id.eq(tenant))
            .filter(accounts_dsl::status.eq(AccountStatus::Active.as_str()))
            .load(&mut conn)?;
        (group_rows, account_rows)
    };

    let failed = state.health.failed_accounts(tenant).await;
    let healthy: Vec<&Account> = account_rows
        .iter()
        .filter(|a| !failed.contains(&a.id))
        .collect();

    let group_ids: Vec<Uuid> = group_rows.iter().map(|(id, _)| *id).collect();
    let chat_by_group: HashMap<Uuid, String> = group_rows.into_iter().collect();
    let healthy_ids: Vec<Uuid> = healthy.iter().map(|a| a.id).collect();
    let current: HashMap<Uuid, Vec<Uuid>> = healthy
        .iter()
        .map(|a| (a.id, a.assigned_group_ids.clone()))
        .collect();

    let mut assignments = compute_assignments(&group_ids, &healthy_ids, &current);
    for account in &account_rows {
        assignments.entry(account.id).or_default();
    }

    for account in &account_rows {
        let new_groups = assignments.remove(&account.id).unwrap_or_default();
        let unchanged = {
            let old: HashSet<&Uuid> = account.assigned_group_ids.iter().collect();
            let new: HashSet<&Uuid> = new_groups.iter().collect();
            old == new
        };
        if unchanged {
            continue;
        }

        {
            let mut conn = state.conn.get()?;
            diesel::update(accounts_dsl::accounts.filter(accounts_dsl::id.eq(account.id)))
                .set(accounts_dsl::assigned_group_ids.eq(new_groups.clone()))
                .execute(&mut conn)?;
        }

        let chats: Vec<String> = new_groups
            .iter()
            .filter_map(|g| chat_by_group.get(g).cloned())
            .collect();
        debug!(
            "Tenant {tenant}: account {} now covers {} group(s)",
            account.id,
            new_groups.len()
        );
        state.supervisor.set_assignments(account.id, chats).await;
    }

    info!(
        "Tenant {tenant}: rebalanced {} group(s) across {} account(s)",
        group_ids.len(),
        healthy_ids.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(assignments: &HashMap<Uuid, Vec<Uuid>>) -> usize {
        let counts: Vec<usize> = assignments.values().map(|v| v.len()).collect();
        counts.iter().max().unwrap_or(&0) - counts.iter().min().unwrap_or(&0)
    }

    fn assert_partition(assignments: &HashMap<Uuid, Vec<Uuid>>, groups: &[Uuid]) {
        let mut seen = HashSet::new();
        for placed in assignments.values().flatten() {
            assert!(seen.insert(*placed), "group assigned twice");
        }
        assert_eq!(seen.len(), groups.len(), "some group left unassigned");
    }

    #[test]
    fn test_fairness_from_scratch() {
        let groups: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let accounts: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        let assignments = compute_assignments(&groups, &accounts, &HashMap::new());

        assert_partition(&assignments, &groups);
        assert!(spread(&assignments) <= 1, "spread {}", spread(&assignments));
    }

    #[test]
    fn test_no_accounts_means_no_assignments() {
        let groups: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        assert!(compute_assignments(&groups, &[], &HashMap::new()).is_empty());
    }

    #[test]
    fn test_single_account_takes_everything() {
        let groups: Vec<Uuid> = (0..7).map(|_| Uuid::new_v4()).collect();
        let account = Uuid::new_v4();
        let assignments = compute_assignments(&groups, &[account], &HashMap::new());
        assert_eq!(assignments[&account].len(), 7);
    }

    #[test]
    fn test_balanced_placements_stay_put() {
        let groups: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut accounts: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        accounts.sort();

        let mut current = HashMap::new();
        current.insert(accounts[0], vec![groups[0], groups[1]]);
        current.insert(accounts[1], vec![groups[2], groups[3]]);

        let assignments = compute_assignments(&groups, &accounts, &current);
        assert_eq!(assignments[&accounts[0]], vec![groups[0], groups[1]]);
        assert_eq!(assignments[&accounts[1]], vec![groups[2], groups[3]]);
    }

    #[test]
    fn test_new_group_goes_to_least_loaded() {
        let groups: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut accounts: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        accounts.sort();

        let mut current = HashMap::new();
        current.insert(accounts[0], vec![groups[0], groups[1]]);
        current.insert(accounts[1], vec![]);

        let assignments = compute_assignments(&groups, &accounts, &current);
        assert!(assignments[&accounts[1]].contains(&groups[2]));
        assert!(spread(&assignments) <= 1);
    }

    #[test]
    fn test_account_removal_redistributes() {
        let groups: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let mut accounts: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        accounts.sort();

        let mut current = HashMap::new();
        current.insert(accounts[0], vec![groups[0], groups[1]]);
        current.insert(accounts[1], vec![groups[2], groups[3]]);
        current.insert(accounts[2], vec![groups[4], groups[5]]);

        // accounts[2] disappears; its groups must land on the survivors.
        let survivors = &accounts[..2];
        let assignments = compute_assignments(&groups, survivors, &current);

        assert_partition(&assignments, &groups);
        assert!(spread(&assignments) <= 1);
        assert_eq!(assignments.len(), 2);
    }

    #[test]
    fn test_overload_is_shaved() {
        let groups: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let mut accounts: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        accounts.sort();

        let mut current = HashMap::new();
        current.insert(accounts[0], groups.clone());
        current.insert(accounts[1], vec![]);

        let assignments = compute_assignments(&groups, &accounts, &current);
        assert_partition(&assignments, &groups);
        assert_eq!(assignments[&accounts[0]].len(), 3);
        assert_eq!(assignments[&accounts[1]].len(), 3);
    }

    #[test]
    fn test_dropped_group_disappears_from_assignments() {
        let groups: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let account = Uuid::new_v4();
        let mut current = HashMap::new();
        current.insert(account, groups.clone());

        let remaining = &groups[..2];
        let assignments = compute_assignments(remaining, &[account], &current);
        assert_eq!(assignments[&account].len(), 2);
        assert!(!assignments[&account].contains(&groups[2]));
    }
}
