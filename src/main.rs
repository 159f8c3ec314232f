//! `mont-pos` command line: the composition root for the POS core.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use mont_pos_lib::app_state::{AppAction, Store};
use mont_pos_lib::auth::{self, Role};
use mont_pos_lib::backend::{
    Backend, GuardedBackend, Query, SqliteBackend, SupabaseBackend, Table,
};
use mont_pos_lib::catalog::{self, NewMenuItem};
use mont_pos_lib::checkout;
use mont_pos_lib::config::{self, AppConfig, BackendMode, RestaurantInfo};
use mont_pos_lib::db::{self, DbState};
use mont_pos_lib::employees::{self, StatusFilter};
use mont_pos_lib::formatting::{format_date_time, format_price, format_quantity};
use mont_pos_lib::kitchen;
use mont_pos_lib::marketing;
use mont_pos_lib::realtime::ChangePoller;
use mont_pos_lib::reports;
use mont_pos_lib::stock::{self, StockBoard, StockLevel};
use mont_pos_lib::types::{CartLine, KitchenTicket, User};
use mont_pos_lib::{diagnostics, init_tracing, storage};

#[derive(Parser)]
#[command(name = "mont-pos", about = "O'PIED DU MONT point of sale", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(flatten)]
    credentials: Credentials,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Credentials {
    #[arg(long, global = true, env = "MONT_POS_PHONE", help = "Staff phone number")]
    phone: Option<String>,
    #[arg(
        long,
        global = true,
        env = "MONT_POS_PASSWORD",
        hide_env_values = true,
        help = "Staff password"
    )]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check staff credentials
    Login,
    /// Reload categories, menu, stock and staff
    Refresh,
    /// Browse the active menu
    Menu(MenuArgs),
    /// Record a paid register sale
    Sell(SellArgs),
    /// Customer checkout with a WhatsApp receipt
    Order(CustomerOrderArgs),
    /// Stock levels
    Stock(StockArgs),
    /// Set a stock unit's quantity by hand
    SetStock { stock_id: String, quantity: f64 },
    /// Active kitchen tickets
    Kitchen {
        #[arg(long, help = "Keep listening for ticket changes")]
        watch: bool,
    },
    /// Move a ticket to its next preparation status
    Advance { ticket_id: String },
    /// Sales report for the last seven days
    Report,
    /// Export today's orders as CSV
    Csv {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    #[command(subcommand)]
    Employees(EmployeeCommands),
    #[command(subcommand)]
    Catalog(CatalogCommands),
    /// Customers to win back, with their WhatsApp links
    Inactive {
        #[arg(long, default_value_t = marketing::DEFAULT_INACTIVE_DAYS)]
        days: i64,
    },
    /// Create the first admin account of an empty local store
    InitAdmin {
        #[arg(long)]
        name: String,
    },
    /// Save backend credentials and terminal settings
    Configure(ConfigureArgs),
    /// Version, configuration and local store health
    Doctor,
}

#[derive(Args)]
struct MenuArgs {
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value = "")]
    search: String,
}

#[derive(Args)]
struct CartArgs {
    /// Menu item ids, optionally with a quantity: `12` or `12:3`
    #[arg(required = true)]
    items: Vec<String>,
}

#[derive(Args)]
struct SellArgs {
    #[command(flatten)]
    cart: CartArgs,
    #[arg(long, default_value = "especes")]
    payment: String,
    #[arg(long, help = "Cashier PIN")]
    pin: String,
    #[arg(long)]
    table: Option<i64>,
}

#[derive(Args)]
struct CustomerOrderArgs {
    #[command(flatten)]
    cart: CartArgs,
    #[arg(long)]
    name: String,
    #[arg(long = "customer-phone")]
    customer_phone: String,
    #[arg(long)]
    payment: Option<String>,
}

#[derive(Args)]
struct StockArgs {
    #[arg(long, help = "Only units at or below their alert threshold")]
    alerts: bool,
    #[arg(long, default_value = "")]
    search: String,
}

#[derive(Subcommand)]
enum EmployeeCommands {
    List {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        status: String,
    },
    Add {
        #[arg(long)]
        name: String,
        #[arg(long = "employee-phone")]
        employee_phone: String,
        #[arg(long, default_value = "staff")]
        role: String,
    },
    Toggle { employee_id: String },
    Delete { employee_id: String },
}

#[derive(Subcommand)]
enum CatalogCommands {
    AddItem {
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
        #[arg(long)]
        category: String,
        #[arg(long)]
        description: Option<String>,
    },
    SetAvailable {
        item_id: String,
        #[arg(action = ArgAction::Set)]
        available: bool,
    },
    SetPrice { item_id: String, price: f64 },
    Delete { item_id: String },
    AddCategory {
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    /// Each unit of the menu item sold consumes `per_unit` of the stock unit
    Link {
        menu_id: String,
        stock_id: String,
        per_unit: f64,
    },
}

#[derive(Args)]
struct ConfigureArgs {
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    key: Option<String>,
    #[arg(long, help = "Connection string (JSON or base64) with url and key")]
    connection: Option<String>,
    #[arg(long)]
    service_rate: Option<f64>,
    #[arg(long)]
    restaurant_name: Option<String>,
    #[arg(long)]
    restaurant_location: Option<String>,
    #[arg(long)]
    restaurant_phone: Option<String>,
    #[arg(long)]
    restaurant_whatsapp: Option<String>,
    #[arg(long, help = "Delete stored backend credentials")]
    reset: bool,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Local database: shared with the SQLite backend, or opened only for
/// terminal settings in hosted mode.
enum LocalDb {
    Shared(Arc<SqliteBackend>),
    Own(DbState),
}

impl LocalDb {
    fn db(&self) -> &DbState {
        match self {
            LocalDb::Shared(backend) => backend.db(),
            LocalDb::Own(state) => state,
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&rusqlite::Connection) -> R) -> Result<R> {
        let conn = self
            .db()
            .conn
            .lock()
            .map_err(|e| anyhow!("local database lock poisoned: {e}"))?;
        Ok(f(&conn))
    }
}

struct CliContext {
    config: AppConfig,
    backend: Arc<dyn Backend>,
    local: LocalDb,
    store: Store,
    json: bool,
}

impl CliContext {
    fn initialize(mut config: AppConfig, json: bool) -> Result<Self> {
        let (backend, local): (Arc<dyn Backend>, LocalDb) = match config.backend {
            BackendMode::Sqlite => {
                let sqlite = Arc::new(
                    SqliteBackend::open(&config.data_dir).context("failed to open local store")?,
                );
                (sqlite.clone() as Arc<dyn Backend>, LocalDb::Shared(sqlite))
            }
            BackendMode::Supabase => {
                let conn = config
                    .supabase
                    .as_ref()
                    .ok_or_else(|| anyhow!("Supabase backend selected without credentials"))?;
                let hosted = SupabaseBackend::with_timeout(&conn.url, &conn.anon_key, config.http_timeout)
                    .context("failed to build Supabase client")?;
                let local = db::init(&config.data_dir).map_err(anyhow::Error::msg)?;
                (Arc::new(hosted) as Arc<dyn Backend>, LocalDb::Own(local))
            }
        };
        local.with_conn(|conn| config.apply_local_settings(conn))?;

        Ok(Self {
            config,
            backend,
            local,
            store: Store::new(),
            json,
        })
    }

    fn info(&self) -> &RestaurantInfo {
        &self.config.restaurant
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<User> {
        let (Some(phone), Some(password)) = (&credentials.phone, &credentials.password) else {
            bail!("this command needs --phone and --password (or MONT_POS_PHONE / MONT_POS_PASSWORD)");
        };
        let user = auth::login(self.backend.as_ref(), phone, password).await?;
        self.store.dispatch(AppAction::SetUser(Some(user.clone())));
        Ok(user)
    }

    /// Backend restricted to what `user` may do.
    fn guarded(&self, user: &User) -> GuardedBackend {
        GuardedBackend::new(self.backend.clone(), user.role)
    }

    fn fill_cart(&self, items: &[String]) -> Result<()> {
        self.store.dispatch(AppAction::ClearCart);
        let menu = self.store.read(|s| s.menu_items.clone());
        for entry in items {
            let (id, quantity) = match entry.split_once(':') {
                Some((id, qty)) => (
                    id,
                    qty.parse::<u32>()
                        .with_context(|| format!("invalid quantity in '{entry}'"))?,
                ),
                None => (entry.as_str(), 1),
            };
            let item = menu
                .iter()
                .find(|m| m.id == id)
                .ok_or_else(|| anyhow!("menu item {id} not found or inactive"))?;
            let mut line = CartLine::for_menu_item(item);
            line.quantity = quantity;
            self.store.dispatch(AppAction::AddToCart(line));
        }
        Ok(())
    }

    fn print<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().map_err(anyhow::Error::msg)?;
    let _guard = init_tracing(&config.data_dir);

    if let Commands::Configure(args) = &cli.command {
        return handle_configure(&config, args, cli.json);
    }

    let context = CliContext::initialize(config, cli.json)?;
    let credentials = &cli.credentials;

    match cli.command {
        Commands::Login => handle_login(&context, credentials).await,
        Commands::Refresh => handle_refresh(&context).await,
        Commands::Menu(args) => handle_menu(&context, args).await,
        Commands::Sell(args) => handle_sell(&context, credentials, args).await,
        Commands::Order(args) => handle_customer_order(&context, credentials, args).await,
        Commands::Stock(args) => handle_stock(&context, credentials, args).await,
        Commands::SetStock { stock_id, quantity } => {
            handle_set_stock(&context, credentials, &stock_id, quantity).await
        }
        Commands::Kitchen { watch } => handle_kitchen(&context, credentials, watch).await,
        Commands::Advance { ticket_id } => handle_advance(&context, credentials, &ticket_id).await,
        Commands::Report => handle_report(&context, credentials).await,
        Commands::Csv { dir } => handle_csv(&context, credentials, dir).await,
        Commands::Employees(command) => handle_employees(&context, credentials, command).await,
        Commands::Catalog(command) => handle_catalog(&context, credentials, command).await,
        Commands::Inactive { days } => handle_inactive(&context, credentials, days).await,
        Commands::InitAdmin { name } => handle_init_admin(&context, credentials, &name).await,
        Commands::Doctor => handle_doctor(&context),
        Commands::Configure(_) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_login(context: &CliContext, credentials: &Credentials) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    context.print(&user, || {
        println!("Bienvenue {} ({})", user.name, user.role);
    })
}

async fn handle_refresh(context: &CliContext) -> Result<()> {
    catalog::refresh_app_data(context.backend.as_ref(), &context.store).await?;
    let state = context.store.snapshot();
    let summary = json!({
        "categories": state.categories.len(),
        "menuItems": state.menu_items.len(),
        "stockItems": state.stock_items.len(),
        "employees": state.employees.len(),
    });
    context.print(&summary, || {
        println!(
            "{} catégories, {} plats, {} articles en stock, {} employés actifs",
            state.categories.len(),
            state.menu_items.len(),
            state.stock_items.len(),
            state.employees.len()
        );
    })
}

async fn handle_menu(context: &CliContext, args: MenuArgs) -> Result<()> {
    catalog::refresh_app_data(context.backend.as_ref(), &context.store).await?;
    let state = context.store.snapshot();
    let items = catalog::filter_menu(&state.menu_items, args.category.as_deref(), &args.search);
    context.print(&items, || {
        println!("{}", catalog::category_tabs(&state.categories).join(" | "));
        for item in &items {
            println!("{:>5}  {:<30} {:>12}  {}", item.id, item.name, format_price(item.price), item.category);
        }
    })
}

async fn handle_sell(context: &CliContext, credentials: &Credentials, args: SellArgs) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    let cashier = auth::verify_pin(&backend, &args.pin)
        .await?
        .ok_or_else(|| anyhow!("Code PIN incorrect"))?;

    catalog::refresh_app_data(&backend, &context.store).await?;
    context.fill_cart(&args.cart.items)?;

    let outcome = checkout::finalize_sale(
        &backend,
        &context.store,
        context.info(),
        &cashier,
        &args.payment,
        args.table,
    )
    .await?;

    for failure in &outcome.stock.failures {
        warn!(line = %failure.display_name, error = %failure.error, "stock not updated for line");
    }
    context.print(&outcome, || {
        println!("{}", outcome.receipt);
        if !outcome.stock.skipped.is_empty() {
            println!("Sans suivi de stock: {}", outcome.stock.skipped.join(", "));
        }
        if let Some(error) = &outcome.kitchen_error {
            println!("Ticket cuisine non envoyé: {error}");
        }
    })
}

async fn handle_customer_order(
    context: &CliContext,
    credentials: &Credentials,
    args: CustomerOrderArgs,
) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    catalog::refresh_app_data(&backend, &context.store).await?;
    context.fill_cart(&args.cart.items)?;

    let outcome = checkout::register_customer_order(
        &backend,
        &context.store,
        context.info(),
        &args.name,
        &args.customer_phone,
        args.payment.as_deref(),
    )
    .await?;
    context.print(&outcome, || {
        println!("{}", outcome.receipt);
        println!();
        println!("{}", outcome.whatsapp_url);
    })
}

async fn handle_stock(context: &CliContext, credentials: &Credentials, args: StockArgs) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    let mut board = StockBoard::default();
    board.refresh(&backend).await?;

    let units: Vec<_> = if args.alerts {
        stock::alerts(board.items())
            .into_iter()
            .filter(|u| u.name.to_lowercase().contains(&args.search.trim().to_lowercase()))
            .collect()
    } else {
        board.search(&args.search)
    };
    context.print(&units, || {
        for unit in &units {
            println!(
                "{:>5}  {:<28} {:>14}  {}",
                unit.stock_id,
                unit.name,
                format_quantity(unit.quantity, &unit.unit),
                StockLevel::of(unit).label()
            );
        }
    })
}

async fn handle_set_stock(
    context: &CliContext,
    credentials: &Credentials,
    stock_id: &str,
    quantity: f64,
) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    let mut board = StockBoard::default();
    board.refresh(&backend).await?;
    let stored = board.set_quantity(&backend, user.role, stock_id, quantity).await?;
    context.print(&json!({ "stockId": stock_id, "quantity": stored }), || {
        println!("Stock {stock_id}: {stored}");
    })
}

fn print_tickets(tickets: &[KitchenTicket]) {
    if tickets.is_empty() {
        println!("Aucune commande en cours");
    }
    for ticket in tickets {
        let table = ticket
            .table_number
            .map(|n| format!("Table {n}"))
            .unwrap_or_else(|| "À emporter".into());
        let at = ticket.created_at.as_ref().map(format_date_time).unwrap_or_default();
        println!("#{} {table} [{}] {at}", ticket.ticket_id, ticket.status.as_str());
        for line in &ticket.lines {
            println!("    {} x {}", line.quantity, line.name);
        }
    }
}

async fn handle_kitchen(context: &CliContext, credentials: &Credentials, watch: bool) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    let tickets = kitchen::active_tickets(&backend).await?;
    context.print(&tickets, || print_tickets(&tickets))?;
    if !watch {
        return Ok(());
    }

    let mut changes = context.backend.subscribe(Table::KitchenTickets);
    let poller = ChangePoller::start(
        context.backend.clone(),
        vec![Table::KitchenTickets],
        context.config.poll_interval,
    );
    info!("watching kitchen tickets, Ctrl-C to stop");
    loop {
        tokio::select! {
            event = changes.recv() => match event {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    let tickets = kitchen::active_tickets(&backend).await?;
                    context.print(&tickets, || print_tickets(&tickets))?;
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    poller.stop();
    Ok(())
}

async fn advance_ticket(
    context: &CliContext,
    credentials: &Credentials,
    ticket_id: &str,
) -> Result<KitchenTicket> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    let ticket = kitchen::find_ticket(&backend, ticket_id).await?;
    Ok(kitchen::advance(&backend, &ticket).await?)
}

async fn handle_advance(context: &CliContext, credentials: &Credentials, ticket_id: &str) -> Result<()> {
    let advanced = advance_ticket(context, credentials, ticket_id).await?;
    context.print(&advanced, || {
        println!("#{} -> {}", advanced.ticket_id, advanced.status.as_str());
    })
}

async fn handle_report(context: &CliContext, credentials: &Credentials) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let report = reports::sales_report(&context.guarded(&user), user.role, Utc::now()).await?;
    context.print(&report, || {
        println!("Chiffre d'affaires du jour: {}", format_price(report.revenue_today));
        println!("Ventes du jour: {}", report.sales_today);
        println!("Clients: {}", report.total_customers);
        let p = &report.by_payment;
        println!(
            "Espèces {} | Wave {} | Orange {} | Moov {} | Carte {}",
            format_price(p.especes),
            format_price(p.wave),
            format_price(p.orange),
            format_price(p.moov),
            format_price(p.carte)
        );
        for day in &report.last_days {
            println!("  {} {}  {}", day.label, day.date.format("%d/%m"), format_price(day.total));
        }
    })
}

async fn handle_csv(context: &CliContext, credentials: &Credentials, dir: PathBuf) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let now = Utc::now();
    let report = reports::sales_report(&context.guarded(&user), user.role, now).await?;
    let path = dir.join(reports::csv_file_name(now.date_naive()));
    std::fs::write(&path, reports::export_csv(&report.today_orders))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), rows = report.today_orders.len(), "sales CSV exported");
    context.print(&json!({ "path": path, "rows": report.today_orders.len() }), || {
        println!("{}", path.display());
    })
}

async fn handle_employees(
    context: &CliContext,
    credentials: &Credentials,
    command: EmployeeCommands,
) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    match command {
        EmployeeCommands::List { search, status } => {
            let status = StatusFilter::parse(&status)
                .ok_or_else(|| anyhow!("unknown status filter '{status}'"))?;
            let all = employees::list_employees(&backend, user.role).await?;
            let shown = employees::filter_employees(&all, &search, status);
            context.print(&shown, || {
                for e in &shown {
                    let state = if e.active { "actif" } else { "inactif" };
                    println!("{:>5}  {:<28} {:<12} {:<8} {state}", e.id, e.name, e.phone, e.role);
                }
            })
        }
        EmployeeCommands::Add {
            name,
            employee_phone,
            role,
        } => {
            let added =
                employees::add_employee(&backend, user.role, &name, &employee_phone, Role::parse(&role))
                    .await?;
            context.print(&added, || println!("Employé ajouté: {} ({})", added.name, added.id))
        }
        EmployeeCommands::Toggle { employee_id } => {
            let rows = backend
                .select(Table::Employees, &Query::by_id(&employee_id))
                .await?;
            let employee = rows
                .first()
                .map(mont_pos_lib::types::Employee::from_row)
                .transpose()?
                .ok_or_else(|| anyhow!("employee {employee_id} not found"))?;
            let active = employees::toggle_active(&backend, user.role, &employee).await?;
            context.print(&json!({ "id": employee_id, "active": active }), || {
                println!("{}: {}", employee.name, if active { "actif" } else { "inactif" });
            })
        }
        EmployeeCommands::Delete { employee_id } => {
            employees::delete_employee(&backend, user.role, &employee_id).await?;
            context.print(&json!({ "deleted": employee_id }), || {
                println!("Employé {employee_id} supprimé");
            })
        }
    }
}

async fn handle_catalog(
    context: &CliContext,
    credentials: &Credentials,
    command: CatalogCommands,
) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let backend = context.guarded(&user);
    let role = user.role;
    match command {
        CatalogCommands::AddItem {
            name,
            price,
            category,
            description,
        } => {
            let item = catalog::add_menu_item(
                &backend,
                role,
                NewMenuItem {
                    name,
                    price,
                    category,
                    description,
                    image: None,
                },
            )
            .await?;
            context.print(&item, || println!("Plat ajouté: {} ({})", item.name, item.id))
        }
        CatalogCommands::SetAvailable { item_id, available } => {
            catalog::set_availability(&backend, role, &item_id, available).await?;
            context.print(&json!({ "id": item_id, "available": available }), || {
                println!("Plat {item_id}: {}", if available { "disponible" } else { "indisponible" });
            })
        }
        CatalogCommands::SetPrice { item_id, price } => {
            catalog::update_price(&backend, role, &item_id, price).await?;
            context.print(&json!({ "id": item_id, "price": price }), || {
                println!("Plat {item_id}: {}", format_price(price));
            })
        }
        CatalogCommands::Delete { item_id } => {
            catalog::delete_menu_item(&backend, role, &item_id).await?;
            context.print(&json!({ "deleted": item_id }), || println!("Plat {item_id} supprimé"))
        }
        CatalogCommands::AddCategory { name, color, icon } => {
            let category =
                catalog::add_category(&backend, role, &name, color.as_deref(), icon.as_deref()).await?;
            context.print(&category, || {
                println!("Catégorie ajoutée: {} {}", category.icon, category.name);
            })
        }
        CatalogCommands::Link {
            menu_id,
            stock_id,
            per_unit,
        } => {
            let link = catalog::add_recipe_link(&backend, role, &menu_id, &stock_id, per_unit).await?;
            let recipe = catalog::recipe_for(&backend, &menu_id).await?;
            context.print(&recipe, || {
                println!(
                    "Plat {} consomme {} du stock {} ({} ingrédient(s))",
                    link.catalog_item_id,
                    link.consumed_per_unit,
                    link.stock_id,
                    recipe.len()
                );
            })
        }
    }
}

async fn handle_inactive(context: &CliContext, credentials: &Credentials, days: i64) -> Result<()> {
    let user = context.authenticate(credentials).await?;
    let customers =
        marketing::inactive_customers(&context.guarded(&user), Utc::now(), days).await?;
    let campaign = marketing::reactivation_campaign(context.info(), customers);
    context.print(&campaign, || {
        for entry in &campaign {
            let last = entry
                .customer
                .last_visit
                .as_ref()
                .map(format_date_time)
                .unwrap_or_default();
            println!("{} ({}) - {last}", entry.customer.name, entry.customer.phone);
            println!("    {}", entry.whatsapp_url);
        }
    })
}

async fn handle_init_admin(context: &CliContext, credentials: &Credentials, name: &str) -> Result<()> {
    if context.config.backend != BackendMode::Sqlite {
        bail!("init-admin only applies to the local store; create staff in Supabase instead");
    }
    let (Some(phone), Some(password)) = (&credentials.phone, &credentials.password) else {
        bail!("init-admin needs --phone and --password for the new account");
    };
    if context.backend.count(Table::Employees, &Query::new()).await? > 0 {
        bail!("the local store already has staff accounts");
    }
    mont_pos_lib::validation::validate_password(password)?;

    let admin = employees::add_employee(context.backend.as_ref(), Role::Admin, name, phone, Role::Admin).await?;
    context
        .backend
        .update(Table::Employees, &Query::by_id(&admin.id), json!({ "password": password }))
        .await?;
    context.print(&admin, || println!("Compte administrateur créé: {}", admin.name))
}

fn handle_configure(config: &AppConfig, args: &ConfigureArgs, json: bool) -> Result<()> {
    if args.reset {
        storage::factory_reset().map_err(anyhow::Error::msg)?;
    }
    if let Some(raw) = &args.connection {
        let conn = config::parse_connection_string(raw)
            .ok_or_else(|| anyhow!("invalid connection string"))?;
        storage::store_backend_credentials(&conn.url, &conn.anon_key).map_err(anyhow::Error::msg)?;
    } else if args.url.is_some() || args.key.is_some() {
        let (Some(url), Some(key)) = (&args.url, &args.key) else {
            bail!("--url and --key must be given together");
        };
        storage::store_backend_credentials(url, key).map_err(anyhow::Error::msg)?;
    }

    let local = db::init(&config.data_dir).map_err(anyhow::Error::msg)?;
    let conn = local
        .conn
        .lock()
        .map_err(|e| anyhow!("local database lock poisoned: {e}"))?;
    if let Some(rate) = args.service_rate {
        config::save_service_rate(&conn, rate).map_err(anyhow::Error::msg)?;
    }
    let mut info = RestaurantInfo::load(&conn);
    let mut changed = false;
    for (value, slot) in [
        (&args.restaurant_name, &mut info.name),
        (&args.restaurant_location, &mut info.location),
        (&args.restaurant_phone, &mut info.phone),
        (&args.restaurant_whatsapp, &mut info.whatsapp),
    ] {
        if let Some(value) = value {
            *slot = value.trim().to_string();
            changed = true;
        }
    }
    if changed {
        info.save(&conn).map_err(anyhow::Error::msg)?;
    }

    let summary = json!({ "credentials": storage::describe(), "restaurant": info });
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Configuration enregistrée pour {}", info.name);
    }
    Ok(())
}

fn handle_doctor(context: &CliContext) -> Result<()> {
    let health = diagnostics::get_system_health(context.local.db()).map_err(anyhow::Error::msg)?;
    let report = json!({
        "about": diagnostics::get_about_info(),
        "backend": context.config.backend,
        "dataDir": context.config.data_dir,
        "serviceRate": context.config.service_rate,
        "restaurant": context.info(),
        "credentials": storage::describe(),
        "keyringConfigured": storage::is_configured(),
        "health": health,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mont_pos_lib::types::{TicketLine, TicketStatus};

    fn local_context(data_dir: &std::path::Path) -> CliContext {
        let data_dir = data_dir.display().to_string();
        let config = AppConfig::resolve(
            |key| (key == config::ENV_DATA_DIR).then(|| data_dir.clone()),
            |_| None,
        )
        .expect("config");
        CliContext::initialize(config, true).expect("context")
    }

    async fn seed_staff(context: &CliContext) {
        for (name, phone, role) in [
            ("Koffi", "0707070707", "chef"),
            ("Yao", "0505050505", "waiter"),
        ] {
            context
                .backend
                .insert(
                    Table::Employees,
                    json!({
                        "nom": name, "telephone": phone, "role": role,
                        "password": "secret1", "actif": true
                    }),
                )
                .await
                .expect("seed employee");
        }
    }

    fn credentials(phone: &str) -> Credentials {
        Credentials {
            phone: Some(phone.into()),
            password: Some("secret1".into()),
        }
    }

    async fn pending_ticket(context: &CliContext) -> KitchenTicket {
        let lines = [TicketLine { name: "Garba".into(), quantity: 2 }];
        kitchen::send_to_kitchen(context.backend.as_ref(), "42", Some(2), &lines)
            .await
            .expect("send ticket")
    }

    #[test]
    fn test_cli_parses_advance() {
        let cli = Cli::try_parse_from(["mont-pos", "--json", "advance", "12"]).expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Advance { ticket_id } => assert_eq!(ticket_id, "12"),
            _ => panic!("expected the advance command"),
        }
    }

    #[test]
    fn test_cli_parses_sale_cart() {
        let cli = Cli::try_parse_from(["mont-pos", "sell", "12:3", "7", "--pin", "1234"])
            .expect("parse");
        match cli.command {
            Commands::Sell(args) => {
                assert_eq!(args.cart.items, vec!["12:3", "7"]);
                assert_eq!(args.payment, "especes");
                assert_eq!(args.pin, "1234");
            }
            _ => panic!("expected the sell command"),
        }
        assert!(Cli::try_parse_from(["mont-pos", "sell", "--pin", "1234"]).is_err());
    }

    #[tokio::test]
    async fn test_advance_ticket_walks_preparation_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = local_context(dir.path());
        seed_staff(&context).await;
        let ticket = pending_ticket(&context).await;
        let chef = credentials("0707070707");

        let advanced = advance_ticket(&context, &chef, &ticket.ticket_id)
            .await
            .expect("to in progress");
        assert_eq!(advanced.status, TicketStatus::InProgress);
        let advanced = advance_ticket(&context, &chef, &ticket.ticket_id)
            .await
            .expect("to ready");
        assert_eq!(advanced.status, TicketStatus::Ready);
        assert!(advance_ticket(&context, &chef, &ticket.ticket_id).await.is_err());

        handle_advance(&context, &chef, &ticket.ticket_id)
            .await
            .expect_err("a ready ticket has no next step");
    }

    #[tokio::test]
    async fn test_advance_unknown_ticket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = local_context(dir.path());
        seed_staff(&context).await;

        let err = advance_ticket(&context, &credentials("0707070707"), "999")
            .await
            .expect_err("no such ticket");
        assert_eq!(err.to_string(), "ticket 999 not found");
    }

    #[tokio::test]
    async fn test_advance_needs_a_valid_login() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = local_context(dir.path());
        seed_staff(&context).await;
        let ticket = pending_ticket(&context).await;

        let wrong_password = Credentials {
            phone: Some("0505050505".into()),
            password: Some("nope!".into()),
        };
        let anonymous = Credentials { phone: None, password: None };
        for credentials in [wrong_password, anonymous] {
            assert!(advance_ticket(&context, &credentials, &ticket.ticket_id)
                .await
                .is_err());
        }
        let stored = kitchen::find_ticket(context.backend.as_ref(), &ticket.ticket_id)
            .await
            .expect("find");
        assert_eq!(stored.status, TicketStatus::Pending);
    }
}
