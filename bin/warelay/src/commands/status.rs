use warelay_core::{Config, Paths};
use warelay_storage::{DirectoryStore, MessageStore};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("warelay status");
    println!("==============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found)" }
    );

    if !config_exists {
        println!();
        println!("Run `warelay onboard` to initialize.");
        return Ok(());
    }

    let config = Config::load(&config_path)?;

    println!(
        "Provider:  {} {}",
        config.provider.base_url,
        if config.provider.api_key.is_empty() {
            "✗ no key"
        } else {
            "✓ configured"
        }
    );
    println!(
        "Number:    {}",
        if config.provider.from_number.is_empty() {
            "✗ not set"
        } else {
            config.provider.from_number.as_str()
        }
    );
    println!("Public:    {}", config.public_url());
    println!(
        "Callbacks: {}",
        if config.provider.callback_user.is_empty() {
            "✗ no credentials (open)"
        } else {
            "✓ basic auth"
        }
    );
    println!();

    let store = MessageStore::open(&paths.messages_db())?;
    let directory = DirectoryStore::open(&paths.directory_db())?;

    println!("Customers: {}", store.list_customers()?.len());
    println!("Agents:    {}", directory.list_agents()?.len());
    println!("Rules:     {}", directory.list_rules()?.len());
    println!("Unread:    {}", store.total_unread()?);

    let announcements = store.active_announcements()?;
    if !announcements.is_empty() {
        println!();
        println!("Announcements:");
        for a in announcements {
            println!("  [{}] {}", a.level, a.message);
        }
    }

    Ok(())
}
