use warelay_core::{phone, Config, Paths};
use warelay_routing::RedirectResolver;
use warelay_storage::{DirectoryStore, MessageStore};

fn open() -> anyhow::Result<(RedirectResolver, DirectoryStore)> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;
    let store = MessageStore::open(&paths.messages_db())?;
    let directory = DirectoryStore::open(&paths.directory_db())?;
    let resolver = RedirectResolver::new(
        store,
        directory.clone(),
        config.routing.max_customers_per_day,
        config.routing.max_agents_per_customer,
    );
    Ok((resolver, directory))
}

pub async fn list() -> anyhow::Result<()> {
    let (_, directory) = open()?;
    let rules = directory.list_rules()?;

    if rules.is_empty() {
        println!("No redirect rules. Add one with `warelay rules add <number> <agent-id>`.");
        return Ok(());
    }

    println!("{:<6} {:<18} {}", "ID", "CUSTOMER", "AGENT");
    for rule in rules {
        let agent = directory
            .agent_by_id(rule.agent_id)?
            .map(|a| a.name)
            .unwrap_or_else(|| format!("#{}", rule.agent_id));
        println!("{:<6} {:<18} {}", rule.id, rule.client_number, agent);
    }
    Ok(())
}

pub async fn add(number: &str, agent_id: i64) -> anyhow::Result<()> {
    if !phone::validate_e164(number) {
        anyhow::bail!("Invalid phone number {} (expected E.164)", number);
    }

    let (resolver, _) = open()?;
    resolver.create_rule(number, agent_id)?;
    println!("✓ {} now redirects to agent {}", number, agent_id);
    Ok(())
}

pub async fn remove(number: &str, agent_id: i64) -> anyhow::Result<()> {
    let (resolver, _) = open()?;
    resolver.delete_rule(number, agent_id)?;
    println!("✓ Removed redirect {} -> agent {}", number, agent_id);
    Ok(())
}
