use std::fmt::{self, Display, Write as _};

use crate::obs::{replicum_of, Obs};

/// `value(error)` with `significance` digits of the error, e.g. `1.70(57)`.
///
/// A zero or non-finite error prints the bare value.
pub fn format_uncertainty(value: f64, dvalue: f64, significance: usize) -> String {
    if dvalue == 0.0 || !dvalue.is_finite() || significance == 0 {
        return format!("{value}");
    }
    let sig = significance as i32;
    let fexp = dvalue.log10().floor() as i32;
    if fexp < 0 {
        let decimals = (-fexp + sig - 1) as usize;
        let digits = dvalue * 10f64.powi(-fexp + sig - 1);
        format!("{value:.decimals$}({digits:.0})")
    } else if fexp == 0 {
        let decimals = (sig - 1) as usize;
        format!("{value:.decimals$}({dvalue:.decimals$})")
    } else {
        let decimals = (sig - fexp - 1).max(0) as usize;
        format!("{value:.decimals$}({dvalue:.decimals$})")
    }
}

/// `%e`-style scientific notation with a signed two digit exponent.
fn sci(x: f64, precision: usize) -> String {
    let s = format!("{x:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(e) => format!("{mantissa}e{}{:02}", if e < 0 { '-' } else { '+' }, e.abs()),
            Err(_) => s,
        },
        None => s,
    }
}

impl Display for Obs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dvalue() {
            Some(dv) => f.write_str(&format_uncertainty(self.value(), dv, 2)),
            None => write!(f, "{}", self.value()),
        }
    }
}

impl Obs {
    /// Human readable summary of the value, the error analysis (if one was
    /// requested), and the chains the record depends on.
    pub fn details(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.write_details(&mut out);
        out
    }

    fn write_details(&self, out: &mut String) -> fmt::Result {
        if let Some(tag) = self.tag() {
            writeln!(out, "Description: {tag}")?;
        }
        match self.analysis() {
            None => writeln!(out, "Result\t {}", sci(self.value(), 8))?,
            Some(a) => {
                let percent = if self.value() == 0.0 {
                    f64::NAN
                } else {
                    (a.dvalue / self.value()).abs() * 100.0
                };
                writeln!(
                    out,
                    "Result\t {} +/- {} +/- {} ({percent:.3}%)",
                    sci(self.value(), 8),
                    sci(a.dvalue, 8),
                    sci(a.ddvalue, 8)
                )?;
                let several = a.ensembles.len() + a.covobs.len() > 1;
                if several {
                    writeln!(out, " Ensemble errors:")?;
                }
                for (name, e) in &a.ensembles {
                    if several {
                        writeln!(out, " {name}\t {} +/- {}", sci(e.dvalue, 6), sci(e.ddvalue, 6))?;
                    }
                    let degraded = if e.degraded { " (degraded)" } else { "" };
                    writeln!(
                        out,
                        " t_int\t {} +/- {} {}{degraded}",
                        sci(e.tauint, 8),
                        sci(e.dtauint, 8),
                        e.mode
                    )?;
                }
                if several {
                    for (name, d) in &a.covobs {
                        writeln!(out, " {name}\t {}", sci(*d, 6))?;
                    }
                }
            }
        }

        let ensembles = self.ensembles();
        let sources = ensembles.len() + self.covobs().len();
        writeln!(
            out,
            "{} samples in {} ensemble{}:",
            self.n_samples(),
            sources,
            if sources == 1 { "" } else { "s" }
        )?;
        for (ensemble, chains) in &ensembles {
            let single = chains.len() == 1 && replicum_of(chains[0]).is_none();
            if single {
                let chain = chains[0];
                writeln!(
                    out,
                    "  \u{b7} Ensemble '{ensemble}' : {} configurations {}",
                    self.shape(chain).unwrap_or(0),
                    self.idl(chain).map(|i| i.describe()).unwrap_or_default()
                )?;
                continue;
            }
            writeln!(out, "  \u{b7} Ensemble '{ensemble}'")?;
            for &chain in chains {
                writeln!(
                    out,
                    "    \u{b7} Replicum '{}' : {} configurations {}",
                    replicum_of(chain).unwrap_or(chain),
                    self.shape(chain).unwrap_or(0),
                    self.idl(chain).map(|i| i.describe()).unwrap_or_default()
                )?;
            }
        }
        for name in self.covobs_names() {
            writeln!(out, "  \u{b7} Covobs '{name}' ")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_significant_digits() {
        assert_eq!(format_uncertainty(1.7, 0.572046658, 2), "1.70(57)");
        assert_eq!(format_uncertainty(12.345, 1.23, 2), "12.3(1.2)");
        assert_eq!(format_uncertainty(1234.4, 56.0, 2), "1234(56)");
        assert_eq!(format_uncertainty(0.5, 0.0, 2), "0.5");
    }

    #[test]
    fn scientific_notation_matches_printf() {
        assert_eq!(sci(1.7, 8), "1.70000000e+00");
        assert_eq!(sci(0.0572046658, 8), "5.72046658e-02");
        assert_eq!(sci(2714.229, 3), "2.714e+03");
    }
}
