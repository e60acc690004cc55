use warelay_core::{phone, Paths};
use warelay_storage::{AgentKind, DirectoryStore};

fn open() -> anyhow::Result<DirectoryStore> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    Ok(DirectoryStore::open(&paths.directory_db())?)
}

pub async fn list() -> anyhow::Result<()> {
    let directory = open()?;
    let agents = directory.list_agents()?;

    if agents.is_empty() {
        println!("No agents registered. Add one with `warelay agents add <name> --phone <number>`.");
        return Ok(());
    }

    println!("{:<6} {:<20} {:<10} {}", "ID", "NAME", "KIND", "PHONE");
    for agent in agents {
        println!(
            "{:<6} {:<20} {:<10} {}",
            agent.id,
            agent.name,
            agent.kind.as_str(),
            agent.phone_number.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn add(name: &str, phone_number: Option<&str>) -> anyhow::Result<()> {
    if let Some(number) = phone_number {
        if !phone::validate_e164(number) {
            anyhow::bail!("Invalid phone number {} (expected E.164, e.g. +15551234567)", number);
        }
    }

    let kind = if phone_number.is_some() {
        AgentKind::Phone
    } else {
        AgentKind::WebUser
    };

    let directory = open()?;
    let agent = directory.add_agent(name, kind, phone_number)?;
    println!("✓ Registered agent {} (id {})", agent.name, agent.id);
    Ok(())
}

pub async fn remove(id: i64) -> anyhow::Result<()> {
    let directory = open()?;
    directory.remove_agent(id)?;
    println!("✓ Removed agent {}", id);
    Ok(())
}
