use chrono::Utc;
use tracing::{info, warn};
use warelay_core::{Error, Result};
use warelay_provider::responses;
use warelay_storage::{Agent, Customer, DirectoryStore, MessageStore};

/// How many id candidates to try before giving up. Collisions only happen
/// when concurrent inbound messages race on the same day sequence.
const ID_ALLOC_ATTEMPTS: u32 = 20;

/// Resolves redirect rules and owns customer identity allocation.
#[derive(Clone)]
pub struct RedirectResolver {
    store: MessageStore,
    directory: DirectoryStore,
    max_customers_per_day: u32,
    max_agents_per_customer: u32,
}

impl RedirectResolver {
    pub fn new(
        store: MessageStore,
        directory: DirectoryStore,
        max_customers_per_day: u32,
        max_agents_per_customer: u32,
    ) -> Self {
        Self {
            store,
            directory,
            max_customers_per_day,
            max_agents_per_customer,
        }
    }

    /// Agents responsible for a customer number.
    pub fn agents_for(&self, client_number: &str) -> Result<Vec<Agent>> {
        self.directory.agents_for_number(client_number)
    }

    /// Customer numbers an agent is responsible for.
    pub fn customers_for(&self, agent_id: i64) -> Result<Vec<String>> {
        self.directory.numbers_for_agent(agent_id)
    }

    /// Create a redirect rule, enforcing the assignment policy: no duplicate
    /// rules, no rule targeting a number that belongs to an agent, and at
    /// most the configured number of agents per customer.
    pub fn create_rule(&self, client_number: &str, agent_id: i64) -> Result<()> {
        let agent = self
            .directory
            .agent_by_id(agent_id)?
            .ok_or_else(|| Error::NotFound(format!("agent {}", agent_id)))?;

        // Redirecting to any agent's number would bounce messages between
        // agents instead of reaching a customer.
        if self.directory.agent_by_phone(client_number)?.is_some() {
            return Err(Error::Validation(
                "Redirect target is an agent's number".into(),
            ));
        }

        if self.directory.rule_exists(client_number, agent_id)? {
            return Err(Error::Validation(format!(
                "Rule {} -> {} already exists",
                client_number, agent.name
            )));
        }

        let count = self.directory.count_rules_for_number(client_number)?;
        if count >= self.max_agents_per_customer as i64 {
            return Err(Error::LimitReached(format!(
                "Customer {} already has {} agents",
                client_number, count
            )));
        }

        self.directory.add_rule(client_number, agent_id)?;
        info!(client_number = %client_number, agent = %agent.name, "Redirect rule created");
        Ok(())
    }

    pub fn delete_rule(&self, client_number: &str, agent_id: i64) -> Result<()> {
        self.directory.delete_rule(client_number, agent_id)
    }

    /// Look up or allocate the customer record for an inbound number.
    /// Returns the customer and whether it was newly created.
    ///
    /// Allocation enforces the daily budget: once spent, a standing
    /// announcement is raised and further unknown numbers are refused until
    /// an allocation succeeds again (a new day), which clears it.
    pub fn ensure_customer(&self, number: &str) -> Result<(Customer, bool)> {
        if let Some(existing) = self.store.customer_by_number(number)? {
            return Ok((existing, false));
        }

        let date = Utc::now().format("%d%m%Y").to_string();
        let today = self.store.customer_ids_for_date(&date)?;

        if today.len() >= self.max_customers_per_day as usize {
            self.store
                .raise_announcement(responses::DAILY_LIMIT_ANNOUNCEMENT, "danger")?;
            warn!(number = %number, "Daily customer budget spent, dropping");
            return Err(Error::LimitReached(format!(
                "Daily customer limit of {} reached",
                self.max_customers_per_day
            )));
        }

        let next_seq = 1 + today
            .iter()
            .filter_map(|cid| cid.rsplit('-').next())
            .filter_map(|seq| seq.parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        for attempt in 0..ID_ALLOC_ATTEMPTS {
            let cid = format!("Customer-{}-{}", date, next_seq + attempt);
            match self.store.create_customer(number, &cid) {
                Ok(customer) => {
                    self.store
                        .clear_announcement(responses::DAILY_LIMIT_ANNOUNCEMENT)?;
                    info!(number = %number, customer_id = %cid, "New customer registered");
                    return Ok((customer, true));
                }
                // The number may have been registered by a racing request.
                Err(_) => {
                    if let Some(existing) = self.store.customer_by_number(number)? {
                        return Ok((existing, false));
                    }
                }
            }
        }

        Err(Error::Other(format!(
            "Customer id allocation for {} exhausted after {} attempts",
            number, ID_ALLOC_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warelay_storage::AgentKind;

    fn setup() -> (RedirectResolver, MessageStore, DirectoryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(&dir.path().join("messages.db")).unwrap();
        let directory = DirectoryStore::open(&dir.path().join("directory.db")).unwrap();
        let resolver = RedirectResolver::new(store.clone(), directory.clone(), 2, 2);
        (resolver, store, directory, dir)
    }

    #[test]
    fn test_rule_policy() {
        let (resolver, _store, directory, _dir) = setup();
        let bob = directory
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        let eve = directory
            .add_agent("Eve", AgentKind::Phone, Some("+15551110002"))
            .unwrap();
        let zed = directory
            .add_agent("Zed", AgentKind::Phone, Some("+15551110003"))
            .unwrap();

        resolver.create_rule("+15550000001", bob.id).unwrap();

        // duplicate
        assert!(matches!(
            resolver.create_rule("+15550000001", bob.id),
            Err(Error::Validation(_))
        ));
        // self redirect
        assert!(matches!(
            resolver.create_rule("+15551110002", eve.id),
            Err(Error::Validation(_))
        ));
        // a colleague's number is just as invalid a target
        assert!(matches!(
            resolver.create_rule("+15551110002", bob.id),
            Err(Error::Validation(_))
        ));
        // per-customer agent limit (max 2 here)
        resolver.create_rule("+15550000001", eve.id).unwrap();
        assert!(matches!(
            resolver.create_rule("+15550000001", zed.id),
            Err(Error::LimitReached(_))
        ));
        // unknown agent
        assert!(matches!(
            resolver.create_rule("+15550000001", 999),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_customer_ids_increment_within_a_day() {
        let (resolver, _store, _directory, _dir) = setup();
        let date = Utc::now().format("%d%m%Y").to_string();

        let (a, created_a) = resolver.ensure_customer("+15550000001").unwrap();
        let (b, created_b) = resolver.ensure_customer("+15550000002").unwrap();
        assert!(created_a && created_b);
        assert_eq!(a.customer_id, format!("Customer-{}-1", date));
        assert_eq!(b.customer_id, format!("Customer-{}-2", date));

        // known number does not allocate
        let (again, created) = resolver.ensure_customer("+15550000001").unwrap();
        assert!(!created);
        assert_eq!(again.customer_id, a.customer_id);
    }

    #[test]
    fn test_daily_budget_raises_announcement() {
        let (resolver, store, _directory, _dir) = setup();
        resolver.ensure_customer("+15550000001").unwrap();
        resolver.ensure_customer("+15550000002").unwrap();

        let err = resolver.ensure_customer("+15550000003");
        assert!(matches!(err, Err(Error::LimitReached(_))));
        assert!(store
            .has_announcement(responses::DAILY_LIMIT_ANNOUNCEMENT)
            .unwrap());

        // a known number still resolves while the budget is spent
        let (known, created) = resolver.ensure_customer("+15550000001").unwrap();
        assert!(!created);
        assert_eq!(known.number, "+15550000001");
    }
}
