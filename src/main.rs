// Entry point and high-level CLI flow.
//
// Without a subcommand the binary runs an interactive dashboard:
// - [1] loads the CSV and prints load diagnostics,
// - [2]-[3] pick the country, year and tuning values,
// - [4]-[8] show metrics, forecast, trends, world ranking and chat.
// `covid_dash serve` starts the HTTP chat service instead.
use clap::{Parser, Subcommand};
use covid_dashboard::cache::{DatasetCache, LoadedDataset, ModelCache, ModelKey};
use covid_dashboard::chat::{ChatHistory, ChatReply, ChatService};
use covid_dashboard::config::{self, Config};
use covid_dashboard::forecast::{self, ForecastParams};
use covid_dashboard::model::train_for_location;
use covid_dashboard::types::{ForecastDisplayRow, WorldLatestRow};
use covid_dashboard::util::{format_int, format_number};
use covid_dashboard::{metrics, output, server, trends, DashboardError};
use std::cmp::Ordering;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "covid_dash", about = "COVID-19 data dashboard", version)]
struct Cli {
    /// CSV file to load. Defaults to COVID_DATA_PATH or owid-covid-data.csv.
    #[arg(long, short)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat API (POST /chat, GET /ping, GET /count_rows).
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Everything one interactive session remembers between menu choices.
struct Dashboard {
    data_path: PathBuf,
    datasets: DatasetCache,
    models: ModelCache,
    loaded: Option<LoadedDataset>,
    country: Option<String>,
    year: Option<i32>,
    top_n: usize,
    horizon: u32,
    changepoint_prior_scale: f64,
    chat: ChatService,
    history: ChatHistory,
}

/// Read a single line of input after printing `prompt`.
fn read_line(prompt: &str) -> String {
    print!("{}", prompt);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

fn read_choice() -> String {
    read_line("Enter choice: ")
}

/// Ask whether to go back to the menu. Returns `true` for `Y`.
fn prompt_back_to_menu() -> bool {
    loop {
        let resp = read_line("Back to Menu (Y/N): ").to_uppercase();
        match resp.as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

/// Parse `input` and accept it only inside `[lo, hi]`.
fn parse_in_range<T>(input: &str, lo: T, hi: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    input.trim().parse::<T>().ok().filter(|v| *v >= lo && *v <= hi)
}

impl Dashboard {
    fn new(data_path: PathBuf, config: &Config) -> Self {
        Self {
            data_path,
            datasets: DatasetCache::default(),
            models: ModelCache::default(),
            loaded: None,
            country: None,
            year: None,
            top_n: config::DEFAULT_TOP_N,
            horizon: config::DEFAULT_HORIZON,
            changepoint_prior_scale: config::DEFAULT_CHANGEPOINT_PRIOR_SCALE,
            chat: ChatService::from_config(config),
            history: ChatHistory::default(),
        }
    }

    fn require_data(&self) -> Option<&LoadedDataset> {
        if self.loaded.is_none() {
            println!("Error: No data loaded. Please load the CSV file first (option 1).\n");
        }
        self.loaded.as_ref()
    }

    /// Option [1]: load (or reload, if the file changed) the CSV.
    fn handle_load(&mut self) {
        let loaded = match self.datasets.get_or_load(&self.data_path) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Failed to load file: {}\n", e);
                return;
            }
        };
        self.models.evict_stale(loaded.generation);

        let r = &loaded.report;
        println!(
            "Processing dataset... ({} rows read, {} loaded for {} locations)",
            format_int(r.total_rows),
            format_int(r.loaded_rows),
            format_int(r.locations)
        );
        if r.parse_errors > 0 {
            println!(
                "Note: {} rows skipped due to a missing location or date.",
                format_int(r.parse_errors)
            );
        }
        if r.duplicates_replaced > 0 {
            println!(
                "Note: {} duplicate (location, date) rows replaced by later ones.",
                format_int(r.duplicates_replaced)
            );
        }

        let ds = &loaded.dataset;
        let keep_country = self
            .country
            .as_deref()
            .is_some_and(|c| ds.has_location(c));
        if !keep_country {
            self.country = if ds.has_location(config::DEFAULT_COUNTRY) {
                Some(config::DEFAULT_COUNTRY.to_string())
            } else {
                ds.locations().first().map(|s| s.to_string())
            };
            self.year = None;
        }
        if let Some(country) = &self.country {
            let years = ds.years_for(country);
            if self.year.map_or(true, |y| !years.contains(&y)) {
                self.year = years.last().copied();
            }
        }
        self.loaded = Some(loaded);
        self.print_selection();
    }

    fn print_selection(&self) {
        println!(
            "Selection: {} / {} | Top N: {} | Forecast days: {} | Changepoint prior scale: {}\n",
            self.country.as_deref().unwrap_or("-"),
            self.year.map_or_else(|| "-".to_string(), |y| y.to_string()),
            self.top_n,
            self.horizon,
            self.changepoint_prior_scale
        );
    }

    /// Option [2]: pick country and year.
    fn handle_select(&mut self) {
        let Some(loaded) = self.require_data() else {
            return;
        };
        let ds = Arc::clone(&loaded.dataset);
        println!("{} locations available.", ds.locations().len());
        let input = read_line("Country (blank keeps current): ");
        if !input.is_empty() {
            let found = ds
                .locations()
                .into_iter()
                .find(|l| l.eq_ignore_ascii_case(&input))
                .map(str::to_string);
            match found {
                Some(c) => {
                    self.year = ds.years_for(&c).last().copied();
                    self.country = Some(c);
                }
                None => {
                    println!("Unknown country: {}\n", input);
                    return;
                }
            }
        }

        let Some(country) = self.country.clone() else {
            return;
        };
        let years = ds.years_for(&country);
        let listed: Vec<String> = years.iter().map(i32::to_string).collect();
        println!("Years for {}: {}", country, listed.join(", "));
        let input = read_line("Year (blank keeps current): ");
        if !input.is_empty() {
            match input.parse::<i32>() {
                Ok(y) if years.contains(&y) => self.year = Some(y),
                _ => println!("Invalid year. Keeping {:?}.", self.year),
            }
        }
        self.print_selection();
    }

    /// Option [3]: top-N, forecast days and changepoint prior scale.
    fn handle_settings(&mut self) {
        let input = read_line("Top N countries by active cases (5-50, blank keeps current): ");
        if !input.is_empty() {
            let (lo, hi) = (*trends::TOP_N_RANGE.start(), *trends::TOP_N_RANGE.end());
            match parse_in_range(&input, lo, hi) {
                Some(n) => self.top_n = n,
                None => println!("Invalid value. Please enter a number between 5 and 50."),
            }
        }
        let input = read_line("Forecast days (7-90, blank keeps current): ");
        if !input.is_empty() {
            let range = config::HORIZON_CHOICES;
            match parse_in_range(&input, *range.start(), *range.end()) {
                Some(d) => self.horizon = d,
                None => println!("Invalid value. Please enter a number between 7 and 90."),
            }
        }
        let input = read_line("Changepoint prior scale (0.001-1.0, blank keeps current): ");
        if !input.is_empty() {
            let (lo, hi) = config::CHANGEPOINT_PRIOR_SCALE_CHOICES;
            match parse_in_range(&input, lo, hi) {
                Some(s) => self.changepoint_prior_scale = s,
                None => println!("Invalid value. Please enter a number between 0.001 and 1.0."),
            }
        }
        self.print_selection();
    }

    /// Option [4]: latest stats with daily change.
    fn handle_summary(&self) {
        let Some(loaded) = self.require_data() else {
            return;
        };
        let (Some(country), Some(year)) = (self.country.as_deref(), self.year) else {
            println!("Select a country first (option 2).\n");
            return;
        };
        println!("Latest COVID Stats (with Daily Change): {} {}\n", country, year);
        let slice = loaded.dataset.country_year_slice(country, year);
        match metrics::summarize(slice) {
            Ok(snapshot) => {
                output::preview_table_rows(&metrics::display_rows(&snapshot), 6);
                let file = Path::new("summary.json");
                if let Err(e) = output::write_json(file, &snapshot) {
                    eprintln!("Write error: {}", e);
                }
                println!("(Snapshot exported to {})\n", file.display());
            }
            Err(e) if e.is_insufficient_data() => {
                println!("Warning: Not enough data to compute summary metrics.\n");
            }
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }

    /// Option [5]: train (or reuse) the model and forecast.
    fn handle_forecast(&mut self) {
        let Some(loaded) = self.require_data().cloned() else {
            return;
        };
        let Some(country) = self.country.clone() else {
            println!("Select a country first (option 2).\n");
            return;
        };
        let params = match ForecastParams::new(self.changepoint_prior_scale, self.horizon) {
            Ok(p) => p,
            Err(e) => {
                println!("Error: {}\n", e);
                return;
            }
        };

        println!("Training model...");
        let key = ModelKey::new(&country, params.changepoint_prior_scale(), loaded.generation);
        let trained = self.models.get_or_try_insert_with(key, || {
            train_for_location(&loaded.dataset, &country, params.changepoint_prior_scale())
        });
        let trained = match trained {
            Ok(t) => t,
            Err(e) if e.is_insufficient_data() => {
                println!("Not enough data to train the model. Try another country.\n");
                return;
            }
            Err(e) => {
                println!("Error: {}\n", e);
                return;
            }
        };

        let points = trained.forecast(params.horizon());
        println!(
            "\nForecast for {} ({} historical + {} future days)\n",
            country,
            trained.input.len(),
            params.horizon()
        );
        let future: Vec<ForecastDisplayRow> = points
            .iter()
            .skip(trained.input.len())
            .map(|p| ForecastDisplayRow {
                date: p.ds.to_string(),
                yhat: format_number(p.yhat, 2),
                yhat_lower: format_number(p.yhat_lower, 2),
                yhat_upper: format_number(p.yhat_upper, 2),
            })
            .collect();
        output::preview_table_rows(&future, 10);

        match forecast::compare(&trained.input, &points) {
            Some(c) => println!(
                "Mean Absolute Error: {}\n",
                format_number(c.mean_absolute_error, 2)
            ),
            None => println!("Warning: No overlapping data to compare actual and predicted values.\n"),
        }

        let file = Path::new("forecast.csv");
        match output::write_csv(file, &forecast::export_rows(&points)) {
            Ok(()) => println!("(Forecast exported to {})\n", file.display()),
            Err(e) => eprintln!("Write error: {}", e),
        }
    }

    /// Option [6]: daily trend with Rt for the selected country-year.
    fn handle_trends(&self) {
        let Some(loaded) = self.require_data() else {
            return;
        };
        let (Some(country), Some(year)) = (self.country.as_deref(), self.year) else {
            println!("Select a country first (option 2).\n");
            return;
        };
        let rows = trends::daily_trend(loaded.dataset.country_year_slice(country, year));
        println!("Trends & Comparisons: {} {} (last 14 days)", country, year);
        println!("(Rt = new cases / new cases 7 days earlier; a rough proxy)\n");
        let display = trends::trend_display_rows(&rows);
        let tail = &display[display.len().saturating_sub(14)..];
        output::preview_table_rows(tail, 14);
    }

    /// Option [7]: world ranking by active cases per 100k or vaccination.
    fn handle_geo(&self) {
        let Some(loaded) = self.require_data() else {
            return;
        };
        let world = trends::world_latest(&loaded.dataset);
        println!("Geographic Overview ({} locations)\n", world.len());
        println!("[1] Active Cases per 100k");
        println!("[2] Vaccination Coverage (%)");
        let by_vaccination = read_choice() == "2";

        let ranked: Vec<WorldLatestRow> = if by_vaccination {
            let mut sorted = world.clone();
            sorted.sort_by(|a, b| {
                b.vaccination_pct
                    .partial_cmp(&a.vaccination_pct)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.location.cmp(&b.location))
            });
            sorted.truncate(self.top_n);
            sorted
        } else {
            match trends::top_n(&world, self.top_n) {
                Ok(rows) => rows,
                Err(e) => {
                    println!("Error: {}\n", e);
                    return;
                }
            }
        };
        let title = if by_vaccination {
            "Top Countries by Vaccination Coverage"
        } else {
            "Top Countries by Active Cases per 100k"
        };
        println!("\n{} (Top {})\n", title, self.top_n);
        output::preview_table_rows(&trends::ranking_display_rows(&ranked), self.top_n);

        let file = Path::new("world_latest.csv");
        match output::write_csv(file, &world) {
            Ok(()) => println!("(Full table exported to {})\n", file.display()),
            Err(e) => eprintln!("Write error: {}", e),
        }
    }

    /// Option [8]: ask a question about the data.
    fn handle_chat(&mut self, runtime: &tokio::runtime::Runtime) {
        let Some(loaded) = self.require_data().cloned() else {
            return;
        };
        println!("Ask Questions on COVID Data with Gemini AI\n");
        if !self.chat.is_configured() {
            println!(
                "Warning: {} is missing; questions cannot be answered.\n",
                config::API_KEY_VAR
            );
        }
        for msg in self.history.messages() {
            println!("{}: {}", msg.role, msg.content);
        }
        let question = read_line("Ask a question: ");
        if question.is_empty() {
            return;
        }
        self.history.push_user(&question);
        println!("Thinking...");
        let text = match runtime.block_on(self.chat.reply(&loaded.dataset, &question)) {
            ChatReply::Answer(answer) => output::render_answer(&answer),
            ChatReply::Error(message) => message,
        };
        self.history.push_assistant(&text);
        println!("\n{}\n", text);
    }
}

fn run_dashboard(data_path: PathBuf, config: &Config) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    if let Some(warning) = config.missing_key_warning() {
        println!("Warning: {}\n", warning);
    }
    let mut dashboard = Dashboard::new(data_path, config);

    loop {
        println!("COVID Dashboard");
        println!("[1] Load the file");
        println!("[2] Select country and year");
        println!("[3] Settings (Top N, forecast days, changepoint prior scale)");
        println!("[4] Latest stats");
        println!("[5] Forecast");
        println!("[6] Trends & Rt");
        println!("[7] Geographic overview");
        println!("[8] Ask a question");
        println!("[0] Exit\n");
        let choice = read_choice();
        match choice.as_str() {
            "1" => dashboard.handle_load(),
            "2" => dashboard.handle_select(),
            "3" => dashboard.handle_settings(),
            "4" | "5" | "6" | "7" | "8" => {
                println!();
                match choice.as_str() {
                    "4" => dashboard.handle_summary(),
                    "5" => dashboard.handle_forecast(),
                    "6" => dashboard.handle_trends(),
                    "7" => dashboard.handle_geo(),
                    _ => dashboard.handle_chat(&runtime),
                }
                if !prompt_back_to_menu() {
                    println!("Exiting the program.");
                    break;
                }
            }
            "0" => {
                println!("Exiting the program.");
                break;
            }
            _ => println!("Invalid choice. Please enter a number from 0 to 8.\n"),
        }
    }
    Ok(())
}

fn serve(data_path: &Path, config: &Config, bind: Option<String>, port: Option<u16>) -> std::io::Result<()> {
    let mut datasets = DatasetCache::default();
    let loaded = datasets.get_or_load(data_path).map_err(|e| match e {
        DashboardError::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    })?;
    let chat = ChatService::from_config(config);
    let bind = bind.unwrap_or_else(|| config.bind_addr.clone());
    let port = port.unwrap_or(config.port);
    actix_web::rt::System::new().block_on(server::run_server(loaded.dataset, chat, &bind, port))
}

fn main() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let config = Config::from_env();
    let data_path = cli.data.unwrap_or_else(|| config.data_path.clone());

    match cli.command {
        Some(Command::Serve { bind, port }) => serve(&data_path, &config, bind, port),
        None => run_dashboard(data_path, &config),
    }
}
