use super::LoadError;
use crate::core::models::cell::{LatticeSystem, MillerIndex, UnitCell};
use crate::core::models::phase::{ModelError, Phase, ProfileParams};
use crate::core::models::reflection::Reflection;
use crate::core::utils::geometry::{self, CU_KA1};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PhaseCardFile {
    /// Wavelength that `two-theta` reflection positions were computed for.
    wavelength: Option<f64>,
    #[serde(rename = "phase", default)]
    phases: Vec<PhaseCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PhaseCard {
    name: String,
    cell: UnitCell,
    /// Overrides the lattice system inferred from `cell`.
    lattice: Option<LatticeSystem>,
    scale: Option<f64>,
    zero_shift: Option<f64>,
    profile: Option<ProfileParams>,
    #[serde(rename = "reflection", default)]
    reflections: Vec<ReflectionCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ReflectionCard {
    hkl: [i32; 3],
    d: Option<f64>,
    two_theta: Option<f64>,
    intensity: f64,
    #[serde(default = "default_multiplicity")]
    multiplicity: u32,
}

fn default_multiplicity() -> u32 {
    1
}

impl ReflectionCard {
    fn into_reflection(self, wavelength: f64) -> Result<Reflection, ModelError> {
        let hkl = MillerIndex::new(self.hkl[0], self.hkl[1], self.hkl[2]);
        let d = match (self.d, self.two_theta) {
            (Some(d), _) => d,
            (None, Some(tt)) => geometry::d_from_two_theta(tt, wavelength).ok_or_else(|| {
                ModelError::InvalidReflection {
                    hkl,
                    reason: format!("two-theta {tt} does not correspond to a d-spacing"),
                }
            })?,
            (None, None) => {
                return Err(ModelError::InvalidReflection {
                    hkl,
                    reason: "either `d` or `two-theta` is required".to_string(),
                });
            }
        };
        Reflection::new(hkl, d, self.intensity, self.multiplicity)
    }
}

impl PhaseCard {
    fn into_phase(self, wavelength: f64) -> Result<Phase, ModelError> {
        let cell = UnitCell::new(
            self.cell.a,
            self.cell.b,
            self.cell.c,
            self.cell.alpha,
            self.cell.beta,
            self.cell.gamma,
        )?;
        let reflections = self
            .reflections
            .into_iter()
            .map(|r| r.into_reflection(wavelength))
            .collect::<Result<Vec<_>, _>>()?;

        let mut phase = Phase::new(&self.name, cell, reflections)
            .with_zero_shift(self.zero_shift.unwrap_or(0.0));
        if let Some(lattice) = self.lattice {
            phase = phase.with_lattice(lattice)?;
        }
        if let Some(scale) = self.scale {
            phase = phase.with_scale(scale)?;
        }
        if let Some(profile) = self.profile {
            phase = phase.with_profile(profile)?;
        }
        Ok(phase)
    }
}

/// Parses TOML phase cards: a list of `[[phase]]` tables, each with a `cell`, optional
/// `lattice`, `scale`, `zero-shift` and `profile`, and `[[phase.reflection]]` entries.
pub fn parse_phases(content: &str, source: &str) -> Result<Vec<Phase>, LoadError> {
    let file: PhaseCardFile = toml::from_str(content).map_err(|e| LoadError::Toml {
        path: source.to_string(),
        source: e,
    })?;
    let wavelength = file.wavelength.unwrap_or(CU_KA1);
    file.phases
        .into_iter()
        .map(|card| {
            card.into_phase(wavelength).map_err(|e| LoadError::Model {
                path: source.to_string(),
                source: e,
            })
        })
        .collect()
}

pub fn read_phases(path: &Path) -> Result<Vec<Phase>, LoadError> {
    let source = path.to_string_lossy().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: source.clone(),
        source: e,
    })?;
    parse_phases(&content, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SILICON: &str = r#"
        [[phase]]
        name = "Silicon"
        cell = { a = 5.431, b = 5.431, c = 5.431, alpha = 90.0, beta = 90.0, gamma = 90.0 }
        scale = 2.0
        zero-shift = 0.01
        profile = { u = 0.0, v = 0.0, w = 0.01, eta = 0.3 }

        [[phase.reflection]]
        hkl = [2, 2, 0]
        d = 1.920
        intensity = 55.0
        multiplicity = 12

        [[phase.reflection]]
        hkl = [1, 1, 1]
        two-theta = 28.44
        intensity = 100.0
        multiplicity = 8
    "#;

    #[test]
    fn phase_card_is_converted_into_a_phase() {
        let phases = parse_phases(SILICON, "mem").unwrap();
        assert_eq!(phases.len(), 1);
        let si = &phases[0];
        assert_eq!(si.name, "Silicon");
        assert_eq!(si.scale, 2.0);
        assert_eq!(si.zero_shift, 0.01);
        assert_eq!(si.profile.eta, 0.3);
        assert_eq!(si.reflections().len(), 2);
        assert_eq!(si.reflections()[0].hkl, MillerIndex::new(1, 1, 1));
        assert!((si.reflections()[0].d_spacing - 3.1355).abs() < 1e-3);
        assert_eq!(si.reflections()[1].multiplicity, 12);
        assert_eq!(si.lattice(), LatticeSystem::Cubic);
    }

    #[test]
    fn lattice_key_overrides_the_inferred_system() {
        let text = r#"
            [[phase]]
            name = "Pseudo-cubic"
            lattice = "orthorhombic"
            cell = { a = 4.0, b = 4.0, c = 4.0, alpha = 90.0, beta = 90.0, gamma = 90.0 }
        "#;
        let phases = parse_phases(text, "mem").unwrap();
        assert_eq!(phases[0].lattice(), LatticeSystem::Orthorhombic);

        let mismatched = text.replace("orthorhombic", "cubic").replace("c = 4.0", "c = 4.4");
        assert!(matches!(
            parse_phases(&mismatched, "mem"),
            Err(LoadError::Model { .. })
        ));
    }

    #[test]
    fn reflection_without_position_is_rejected() {
        let text = r#"
            [[phase]]
            name = "X"
            cell = { a = 4.0, b = 4.0, c = 4.0, alpha = 90.0, beta = 90.0, gamma = 90.0 }
            [[phase.reflection]]
            hkl = [1, 0, 0]
            intensity = 1.0
        "#;
        let result = parse_phases(text, "mem");
        assert!(matches!(result, Err(LoadError::Model { .. })));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = r#"
            [[phase]]
            name = "X"
            colour = "red"
            cell = { a = 4.0, b = 4.0, c = 4.0, alpha = 90.0, beta = 90.0, gamma = 90.0 }
        "#;
        assert!(matches!(parse_phases(text, "mem"), Err(LoadError::Toml { .. })));
    }

    #[test]
    fn read_phases_loads_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.toml");
        fs::write(&path, SILICON).unwrap();
        assert_eq!(read_phases(&path).unwrap().len(), 1);
    }

    #[test]
    fn read_phases_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = read_phases(&dir.path().join("none.toml"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }
}
