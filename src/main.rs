use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use product_gallery_lib::analytics::Interaction;
use product_gallery_lib::commands;
use product_gallery_lib::config::AppConfig;
use product_gallery_lib::filters::{FilterState, SortOrder};
use product_gallery_lib::ingestion::{Attribute, Language};
use product_gallery_lib::session::ViewMode;
use product_gallery_lib::settings::UpdateAppDataPayload;
use product_gallery_lib::Gallery;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "product-gallery", version, about = "Spreadsheet-backed product gallery feed")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the sheet and print one gallery page as JSON
    Page(PageArgs),
    /// Record a view, like, click, link visit or search
    Record {
        #[arg(value_enum)]
        interaction: InteractionArg,
        /// Product the interaction belongs to
        #[arg(long)]
        product: Option<String>,
    },
    /// Print the analytics counters
    Stats,
    /// Print resolved configuration and store locations
    Health,
    /// Show or update the stored language and logo
    AppData {
        #[arg(long)]
        language: Option<String>,
        /// Empty string clears the logo
        #[arg(long)]
        logo_url: Option<String>,
    },
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(long, default_value = "kurdish")]
    language: String,
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long, value_delimiter = ',')]
    tag: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    color: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    material: Vec<String>,
    #[arg(long, value_enum, default_value = "none")]
    sort: SortArg,
    #[arg(long, value_enum, default_value = "medium")]
    view: ViewArg,
    /// Number of "load more" steps after the first page
    #[arg(long, default_value_t = 0)]
    more: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InteractionArg {
    View,
    Like,
    Click,
    LinkVisit,
    Search,
}

impl From<InteractionArg> for Interaction {
    fn from(value: InteractionArg) -> Self {
        match value {
            InteractionArg::View => Interaction::View,
            InteractionArg::Like => Interaction::Like,
            InteractionArg::Click => Interaction::Click,
            InteractionArg::LinkVisit => Interaction::LinkVisit,
            InteractionArg::Search => Interaction::Search,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortArg {
    None,
    Newest,
    Oldest,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ViewArg {
    ExtraLarge,
    Large,
    Medium,
    Small,
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let gallery = Gallery::initialize(AppConfig::from_env()).context("initializing gallery")?;

    match cli.command {
        Command::Page(args) => {
            let language = Language::parse(&args.language)?;
            let mut session = gallery.new_session(language);
            session.set_view_mode(match args.view {
                ViewArg::ExtraLarge => ViewMode::ExtraLarge,
                ViewArg::Large => ViewMode::Large,
                ViewArg::Medium => ViewMode::Medium,
                ViewArg::Small => ViewMode::Small,
                ViewArg::List => ViewMode::List,
            });
            let mut filters = FilterState::default()
                .with_search(args.search)
                .with_sort(match args.sort {
                    SortArg::None => SortOrder::None,
                    SortArg::Newest => SortOrder::Newest,
                    SortArg::Oldest => SortOrder::Oldest,
                });
            for (attribute, values) in [
                (Attribute::Tag, &args.tag),
                (Attribute::Color, &args.color),
                (Attribute::Material, &args.material),
            ] {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                filters = filters.with_selected(attribute, &values);
            }
            session.set_filters(filters);
            for _ in 0..args.more {
                session.load_more();
            }

            let page = commands::load_gallery_page(&gallery, &session).await;
            print_json(&page)?;
        }
        Command::Record {
            interaction,
            product,
        } => {
            commands::record_interaction(&gallery, interaction.into(), product)
                .map_err(anyhow::Error::msg)?;
            print_json(&gallery.analytics()?)?;
        }
        Command::Stats => print_json(&gallery.analytics()?)?,
        Command::Health => print_json(&commands::gallery_health(&gallery))?,
        Command::AppData { language, logo_url } => {
            let data = if language.is_none() && logo_url.is_none() {
                commands::get_app_data(&gallery).map_err(anyhow::Error::msg)?
            } else {
                let payload = UpdateAppDataPayload {
                    language: language.as_deref().map(Language::parse).transpose()?,
                    logo_url,
                };
                commands::update_app_data(&gallery, payload).map_err(anyhow::Error::msg)?
            };
            print_json(&serde_json::json!({ "data": data, "logo": data.logo() }))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
