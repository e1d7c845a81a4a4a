//! Application entry: wires logging, configuration and CSV in/out around
//! the pipeline. The `cvrp-solver` binary is a thin shim over [`run`].

use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;

use colored::Colorize;
use csv::Writer;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::MainConfig;
use crate::domain::solution::Solution;
use crate::fixtures::load_customers_from_csv;
use crate::pipeline::Pipeline;

/// Initialize tracing and environment
fn init_tracing_and_env() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            fmt::layer()
                .with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE)
                .compact(),
        )
        .init();

    dotenv().ok();
}

fn load_config(path: Option<&str>) -> Result<MainConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => MainConfig::from_file(path)?,
        None if Path::new("config.json").exists() => MainConfig::from_file("config.json")?,
        None => MainConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    init_tracing_and_env();

    let args: Vec<String> = env::args().collect();
    let input_path = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("data/customers.csv");
    let config = load_config(args.get(2).map(String::as_str))?;

    info!(
        "starting CVRP optimization: input {}, fleet of {} classes",
        input_path,
        config.enabled_fleet().len()
    );

    let customers = load_customers_from_csv(input_path)?;
    let pipeline = Pipeline::new(config)?;
    let outcome = pipeline.run(customers).await?;

    print_summary(&outcome.solution);

    fs::create_dir_all("output")?;
    save_routes_csv(&outcome.solution, "output/routes.csv")?;
    save_overflow_csv(&outcome.solution, "output/overflow.csv")?;
    info!("route and overflow reports written to output/");

    Ok(())
}

fn print_summary(solution: &Solution) {
    println!();
    if solution.routes.is_empty() && !solution.overflow.is_empty() {
        println!("{}", "No routes produced".red());
    } else {
        println!("{}", "CVRP optimization finished".green());
    }
    println!(
        "{} , Vehicles used: {}, Unserved: {}",
        format_args!(
            "Distance: {:.2} km, Time: {:.1} min",
            solution.total_distance_km, solution.total_time_minutes
        )
        .to_string()
        .green(),
        solution.vehicles_used,
        solution.overflow.len()
    );
    for route in &solution.routes {
        println!(
            "  {}#{}: {} stops, {:.1} st, {:.2} km, {:.1} min",
            route.vehicle_class,
            route.vehicle_ordinal,
            route.customers.len(),
            route.total_volume,
            route.total_distance_km,
            route.total_time_minutes
        );
    }
    for unserved in &solution.overflow {
        println!(
            "  {} {} ({:.1} st): {}",
            "unserved".yellow(),
            unserved.customer.id,
            unserved.customer.volume,
            unserved.reason.as_str()
        );
    }
    println!(
        "Solved in {:.2} seconds",
        solution.solve_time_seconds
    );
}

fn save_routes_csv(solution: &Solution, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_path(filename)?;
    wtr.write_record([
        "vehicle_class",
        "vehicle_ordinal",
        "stop",
        "customer_id",
        "customer_name",
        "volume",
        "lat",
        "lon",
    ])?;
    for route in &solution.routes {
        for (stop, customer) in route.customers.iter().enumerate() {
            let (lat, lon) = customer.coordinates.unwrap_or((f64::NAN, f64::NAN));
            wtr.write_record([
                route.vehicle_class.to_string(),
                route.vehicle_ordinal.to_string(),
                (stop + 1).to_string(),
                customer.id.clone(),
                customer.name.clone(),
                customer.volume.to_string(),
                lat.to_string(),
                lon.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

fn save_overflow_csv(solution: &Solution, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_path(filename)?;
    wtr.write_record(["customer_id", "customer_name", "volume", "reason", "raw_gps"])?;
    for unserved in &solution.overflow {
        wtr.write_record([
            unserved.customer.id.clone(),
            unserved.customer.name.clone(),
            unserved.customer.volume.to_string(),
            unserved.reason.as_str().to_string(),
            unserved.customer.raw_gps.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
