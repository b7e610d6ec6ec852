use crate::accountant::{AccountEvent, ChargeForecast, UsageLevel};
use crate::intensity::UNKNOWN_INTENSITY;
use crate::intensity::registry::CountryInfo;
use crate::status::StatusReport;
use colored::{ColoredString, Colorize};

const LABEL_W: usize = 18;

fn level_label(level: UsageLevel) -> ColoredString {
    let text = level.to_string();
    match level {
        UsageLevel::VeryLow | UsageLevel::Low => text.green(),
        UsageLevel::Medium => text.yellow(),
        UsageLevel::High | UsageLevel::VeryHigh => text.red(),
    }
}

fn forecast_label(forecast: ChargeForecast) -> ColoredString {
    let text = forecast.to_string();
    match forecast {
        ChargeForecast::ChargeNow => text.green().bold(),
        ChargeForecast::ChargeIn30 | ChargeForecast::ChargeIn60 => text.yellow(),
        ChargeForecast::ChargeWhenNeeded => text.normal(),
    }
}

fn intensity_text(value: i32) -> String {
    if value == UNKNOWN_INTENSITY {
        "N/A".to_string()
    } else {
        format!("{} g/kWh", value)
    }
}

/// Format a mass in grams, switching to kilograms past 1000 g.
pub fn format_grams(grams: f64) -> String {
    if grams >= 1000.0 {
        format!("{:.2} kg", grams / 1000.0)
    } else {
        format!("{:.2} g", grams)
    }
}

fn print_box(title: &str, rows: &[(&str, String)]) {
    // Box width from content, measured on the plain text.
    let inner_w = rows
        .iter()
        .map(|(l, v)| l.len().max(LABEL_W) + 2 + v.chars().count())
        .max()
        .unwrap_or(40)
        .max(title.len() + 2);

    let fill = inner_w.saturating_sub(1 + title.len());
    println!("╭─ {} {}╮", title.bold(), "─".repeat(fill));

    for (label, value) in rows {
        let padded = format!("{:<w$}", label, w = LABEL_W);
        let pad = inner_w.saturating_sub(LABEL_W + 2 + value.chars().count());
        println!("│ {}  {}{} │", padded.dimmed(), value, " ".repeat(pad));
    }

    println!("╰{}╯", "─".repeat(inner_w + 2));
}

pub fn print_status(report: &StatusReport) {
    let battery = &report.battery;
    let mut rows: Vec<(&str, String)> = vec![
        ("Telemetry", battery.backend.clone()),
        ("Power State", battery.state.to_string()),
        ("Grid Draw", format!("{:.1} W", battery.estimated_watts)),
    ];
    if battery.average_discharge_rate_mw > 0 {
        rows.push((
            "Avg Discharge",
            format!("{:.1} W", battery.average_discharge_rate_mw as f64 / 1000.0),
        ));
    }
    print_box("Power", &rows);

    let intensity = &report.intensity;
    let region = match &intensity.region_name {
        Some(name) => format!("{} {} ({})", intensity.country, intensity.region_id, name),
        None => format!("{} {}", intensity.country, intensity.region_id),
    };
    let mut rows: Vec<(&str, String)> = vec![
        ("Region", region),
        ("Provider", intensity.provider.clone()),
    ];
    let snapshot = &intensity.snapshot;
    if snapshot.valid {
        rows.push(("Now", intensity_text(snapshot.now)));
        rows.push(("Next 30 min", intensity_text(snapshot.next)));
        rows.push(("Next 60 min", intensity_text(snapshot.later)));
        if let Some(to) = snapshot.valid_to {
            rows.push(("Valid Until", to.format("%H:%M UTC").to_string()));
        }
    }
    print_box("Grid", &rows);

    if !snapshot.valid {
        println!(
            "  {} {}",
            "Intensity unavailable:".red().bold(),
            snapshot.error_message()
        );
    }
    if let Some(level) = intensity.usage_level {
        println!("  {} {}", "Usage level:".bold(), level_label(level));
    }
    if let Some(forecast) = intensity.forecast {
        println!("  {} {}", "Forecast:".bold(), forecast_label(forecast));
    }
    if let Some(rate) = intensity.grams_per_hour {
        println!(
            "  {} {} per hour at the current draw",
            "Emitting:".bold(),
            format_grams(rate)
        );
    }
    println!(
        "  {} {}",
        "Lifetime total:".bold(),
        format_grams(report.lifetime_carbon_grams).cyan()
    );
}

pub fn print_status_json(report: &StatusReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize status: {}", e),
    }
}

/// One line per accountant event, for the foreground loop.
pub fn print_event(event: &AccountEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
        return;
    }

    let time = chrono::Local::now().format("%H:%M:%S").to_string();
    match event {
        AccountEvent::SessionCarbonChanged(g) => {
            println!("{} {:<16} {}", time.dimmed(), "session", format_grams(*g))
        }
        AccountEvent::LifetimeCarbonChanged(g) => println!(
            "{} {:<16} {}",
            time.dimmed(),
            "lifetime",
            format_grams(*g).cyan()
        ),
        AccountEvent::UsageLevelChanged(level) => {
            println!("{} {:<16} {}", time.dimmed(), "usage level", level_label(*level))
        }
        AccountEvent::ChargeForecastChanged(forecast) => println!(
            "{} {:<16} {}",
            time.dimmed(),
            "forecast",
            forecast_label(*forecast)
        ),
        AccountEvent::IntensityUnavailable(reason) => {
            println!("{} {} {}", time.dimmed(), format!("{:<16}", "unavailable").red(), reason)
        }
    }
}

pub fn print_regions(countries: &[CountryInfo]) {
    for country in countries {
        let title = format!("{} {} ({})", country.code, country.name, country.provider);
        let divider_w: usize = 48;
        let fill = divider_w.saturating_sub(4 + title.len());
        println!("── {} {}", title.bold(), "─".repeat(fill));
        for region in country.regions {
            println!("  {}  {}", format!("{:>3}", region.id).cyan(), region.name);
        }
        println!();
    }
}

pub fn print_regions_json(countries: &[CountryInfo]) {
    match serde_json::to_string_pretty(countries) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize regions: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_grams() {
        assert_eq!(format_grams(0.1), "0.10 g");
        assert_eq!(format_grams(999.994), "999.99 g");
        assert_eq!(format_grams(1500.0), "1.50 kg");
    }

    #[test]
    fn test_intensity_text() {
        assert_eq!(intensity_text(UNKNOWN_INTENSITY), "N/A");
        assert_eq!(intensity_text(182), "182 g/kWh");
    }

    #[test]
    fn test_event_json_shape() {
        let line = serde_json::to_string(&AccountEvent::UsageLevelChanged(UsageLevel::VeryLow)).unwrap();
        assert_eq!(line, r#"{"event":"usage_level_changed","value":"very_low"}"#);
    }
}
