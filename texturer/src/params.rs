use std::fmt;
use std::str::FromStr;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::cli::Array as CliArray;
use structopt::StructOpt;

use crate::engine::BackendKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelVariant {
    SelectTexture,
    Preview,
}

impl KernelVariant {
    pub fn name(&self) -> &'static str {
        match self {
            KernelVariant::SelectTexture => "select-texture",
            KernelVariant::Preview => "preview",
        }
    }

    pub fn entry_point(&self) -> &'static str {
        match self {
            KernelVariant::SelectTexture => "select_texture",
            KernelVariant::Preview => "preview_texture",
        }
    }
}

impl FromStr for KernelVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "select-texture" => Ok(KernelVariant::SelectTexture),
            "preview" => Ok(KernelVariant::Preview),
            _ => Err(Error::new(
                Configuration,
                format!("missing compute kernel variant '{}'", s),
            )),
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AssignmentParameters {
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub screen_width: f32,
    pub screen_height: f32,
    pub variant: KernelVariant,
    pub depth_tolerance: f32, // Meters.
    pub max_in_flight: usize,
}

impl Default for AssignmentParameters {
    fn default() -> Self {
        Self {
            grid_cols: 16,
            grid_rows: 12,
            screen_width: 1920.0,
            screen_height: 1440.0,
            variant: KernelVariant::SelectTexture,
            depth_tolerance: 0.05,
            max_in_flight: 3,
        }
    }
}

impl AssignmentParameters {
    pub fn validate(&self) -> Result<()> {
        let config_err = |desc: &str| -> Result<()> {
            Err(Error::new(Configuration, desc.to_string()))
        };

        if self.grid_cols == 0 || self.grid_rows == 0 {
            return config_err("coverage grid must have positive dimensions");
        }
        if !(self.screen_width > 0.0 && self.screen_height > 0.0) {
            return config_err("screen size must be positive");
        }
        if !(self.depth_tolerance >= 0.0 && self.depth_tolerance.is_finite()) {
            return config_err("depth tolerance must be finite and non-negative");
        }
        if self.max_in_flight == 0 {
            return config_err("at least one chunk must be allowed in flight");
        }

        Ok(())
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct AssignmentOpts {
    #[structopt(
        help = "Screen size of captured frames in form 'width,height'",
        long,
        default_value = "1920,1440"
    )]
    screen_size: CliArray<f32, 2>,

    #[structopt(
        help = "Coverage grid resolution in form 'cols,rows'",
        long,
        default_value = "16,12"
    )]
    grid: CliArray<u32, 2>,

    #[structopt(
        help = "Tolerance of occlusion test in meters",
        long,
        default_value = "0.05"
    )]
    depth_tolerance: f32,

    #[structopt(
        help = "Maximum number of chunks dispatched at once",
        long,
        default_value = "3"
    )]
    max_in_flight: usize,

    #[structopt(
        help = "Compute backend (can be 'cpu' or 'gpu')",
        long,
        default_value = "cpu"
    )]
    pub backend: BackendKind,
}

impl AssignmentOpts {
    pub fn parameters(
        &self,
        variant: KernelVariant,
    ) -> Result<AssignmentParameters> {
        let params = AssignmentParameters {
            grid_cols: self.grid.0[0],
            grid_rows: self.grid.0[1],
            screen_width: self.screen_size.0[0],
            screen_height: self.screen_size.0[1],
            variant,
            depth_tolerance: self.depth_tolerance,
            max_in_flight: self.max_in_flight,
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_variant() {
        let variant = "preview".parse::<KernelVariant>().unwrap();
        assert_eq!(variant, KernelVariant::Preview);
        assert_eq!(variant.entry_point(), "preview_texture");
        assert_eq!(KernelVariant::SelectTexture.to_string(), "select-texture");

        let err = "best-angle".parse::<KernelVariant>().unwrap_err();
        assert_eq!(err.kind, Configuration);
        assert_eq!(&err.description, "missing compute kernel variant 'best-angle'");
    }

    #[test]
    fn test_validate_parameters() {
        assert!(AssignmentParameters::default().validate().is_ok());

        let invalid = [
            AssignmentParameters {
                grid_rows: 0,
                ..Default::default()
            },
            AssignmentParameters {
                screen_width: 0.0,
                ..Default::default()
            },
            AssignmentParameters {
                depth_tolerance: f32::NAN,
                ..Default::default()
            },
            AssignmentParameters {
                depth_tolerance: f32::INFINITY,
                ..Default::default()
            },
            AssignmentParameters {
                max_in_flight: 0,
                ..Default::default()
            },
        ];
        for params in invalid {
            assert_eq!(params.validate().unwrap_err().kind, Configuration);
        }
    }

    #[test]
    fn test_parse_opts() {
        let opts = AssignmentOpts::from_iter_safe(&[
            "test",
            "--screen-size",
            "640,480",
            "--grid",
            "4,3",
        ])
        .unwrap();
        let params = opts.parameters(KernelVariant::Preview).unwrap();
        assert_eq!(params.screen_width, 640.0);
        assert_eq!(params.grid_rows, 3);
        assert_eq!(params.max_in_flight, 3);
        assert_eq!(opts.backend, BackendKind::Cpu);

        let opts = AssignmentOpts::from_iter_safe(&["test", "--grid", "0,3"])
            .unwrap();
        let err = opts.parameters(KernelVariant::Preview).unwrap_err();
        assert_eq!(err.kind, Configuration);
    }
}
