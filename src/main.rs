use anyhow::{Context, Result, bail};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use dicom_calcium::{
    Connectivity, Engine, EngineConfig, Point, RoiShape, RoiSpec, SpacingSource, StackLoader,
};
use env_logger::{Builder, Env};
use log::info;
use std::{fs, path::PathBuf};

#[derive(Parser)]
#[command(name = "dicom-calcium")]
#[command(about = "Agatston-style calcium scoring of a ROI in a DICOM CT series")]
struct Cli {
    /// Directory containing the .dcm files of one series
    dicom_dir: PathBuf,

    /// Index of the slice the ROI was drawn on
    #[arg(long)]
    slice: usize,

    /// Number of slices included above and below the reference slice
    #[arg(long, default_value_t = 0)]
    z_bounds: usize,

    /// Circular ROI as "x,y,radius" in pixels
    #[arg(long, value_parser = parse_circle, conflicts_with = "polygon", required_unless_present = "polygon")]
    circle: Option<RoiShape>,

    /// Polygon ROI as "x1,y1;x2,y2;x3,y3;..." in pixels
    #[arg(long, value_parser = parse_polygon)]
    polygon: Option<RoiShape>,

    /// TOML file with engine settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stack attribute giving the z size of a voxel
    #[arg(long, value_enum)]
    spacing_source: Option<SpacingSource>,

    #[arg(long, value_enum)]
    connectivity: Option<Connectivity>,

    #[arg(long)]
    density_floor: Option<f32>,

    #[arg(long)]
    min_calcium_voxels: Option<usize>,

    #[arg(long)]
    micro_calcium_threshold: Option<usize>,

    /// Also report individual lesions
    #[arg(long)]
    lesions: bool,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

fn parse_numbers(s: &str, expected: usize) -> Result<Vec<f64>, String> {
    let values = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("Invalid number: '{part}'"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(format!("Expected {expected} comma separated numbers, got '{s}'"));
    }
    Ok(values)
}

fn parse_circle(s: &str) -> Result<RoiShape, String> {
    let values = parse_numbers(s, 3)?;
    Ok(RoiShape::Circular {
        center: Point::new(values[0], values[1]),
        radius: values[2],
    })
}

fn parse_polygon(s: &str) -> Result<RoiShape, String> {
    let vertices = s
        .split(';')
        .filter(|vertex| !vertex.trim().is_empty())
        .map(|vertex| parse_numbers(vertex, 2).map(|xy| Point::new(xy[0], xy[1])))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoiShape::Polygon { vertices })
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut table = match &cli.config {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Cannot read config file {}", path.display()))?;
            toml::from_str::<toml::Table>(&content)
                .with_context(|| format!("Cannot parse config file {}", path.display()))?
        }
        None => toml::Table::new(),
    };

    if let Some(source) = cli.spacing_source {
        table.insert("spacing_source".to_string(), toml::Value::try_from(source)?);
    }
    if !table.contains_key("spacing_source") {
        bail!("--spacing-source is required unless the config file sets spacing_source");
    }

    let mut config: EngineConfig = toml::Value::Table(table)
        .try_into()
        .context("Invalid engine configuration")?;
    if let Some(connectivity) = cli.connectivity {
        config.connectivity = connectivity;
    }
    if let Some(floor) = cli.density_floor {
        config.density_floor = floor;
    }
    if let Some(min_voxels) = cli.min_calcium_voxels {
        config.min_calcium_voxels = min_voxels;
    }
    if let Some(threshold) = cli.micro_calcium_threshold {
        config.micro_calcium_threshold = threshold;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::from_env(Env::default().default_filter_or(cli.verbosity.log_level_filter().as_str()))
        .init();

    let config = build_config(&cli)?;
    let engine = Engine::new(config)?;

    let shape = match (&cli.circle, &cli.polygon) {
        (Some(circle), _) => circle.clone(),
        (None, Some(polygon)) => polygon.clone(),
        (None, None) => bail!("Either --circle or --polygon is required"),
    };
    let roi = RoiSpec::new(shape, cli.slice, cli.z_bounds);

    let stack = StackLoader::load_from_directory(&cli.dicom_dir)
        .with_context(|| format!("Cannot load DICOM series from {}", cli.dicom_dir.display()))?;
    info!("Loaded {} slices from {}", stack.len(), cli.dicom_dir.display());

    let result = if cli.lesions {
        engine.score_lesions(&stack, &roi)?
    } else {
        engine.score(&stack, &roi)?
    };
    info!(
        "Score {:.2}, volume {:.2} mm³",
        result.aggregate_score, result.aggregate_volume_mm3
    );

    println!("{}", toml::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_circle_and_polygon() {
        assert_eq!(
            parse_circle("10.5, 20, 4").unwrap(),
            RoiShape::Circular {
                center: Point::new(10.5, 20.0),
                radius: 4.0,
            }
        );
        assert_eq!(
            parse_polygon("0,0;4,0;4,4;").unwrap(),
            RoiShape::Polygon {
                vertices: vec![
                    Point::new(0.0, 0.0),
                    Point::new(4.0, 0.0),
                    Point::new(4.0, 4.0),
                ],
            }
        );
        assert!(parse_circle("1,2").is_err());
        assert!(parse_polygon("1,a;2,3").is_err());
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calcium.toml");
        fs::write(&path, "density_floor = 150.0\nconnectivity = \"per-slice\"\n").unwrap();

        let cli = Cli::parse_from([
            "dicom-calcium",
            "series",
            "--slice",
            "3",
            "--circle",
            "5,5,2",
            "--config",
            path.to_str().unwrap(),
            "--spacing-source",
            "slice-thickness",
            "--min-calcium-voxels",
            "5",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.density_floor, 150.0);
        assert_eq!(config.connectivity, Connectivity::PerSlice);
        assert_eq!(config.spacing_source, SpacingSource::SliceThickness);
        assert_eq!(config.min_calcium_voxels, 5);
    }

    #[test]
    fn spacing_source_is_required() {
        let cli = Cli::parse_from(["dicom-calcium", "series", "--slice", "0", "--circle", "1,1,1"]);
        assert!(build_config(&cli).is_err());
    }
}
