use serde::Serialize;

/// Scoreline grid size per side; the tail mass lands in the last cell.
pub const MAX_GOALS: u32 = 10;

/// Pre-match outcome probabilities, each in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutcomeProbabilities {
    pub p_home: f64,
    pub p_draw: f64,
    pub p_away: f64,
}

impl OutcomeProbabilities {
    pub fn from_fractions(home: f64, draw: f64, away: f64) -> Self {
        let mut p_home = home.max(0.0) * 100.0;
        let mut p_draw = draw.max(0.0) * 100.0;
        let mut p_away = away.max(0.0) * 100.0;
        let sum = (p_home + p_draw + p_away).max(0.0001);
        p_home = p_home / sum * 100.0;
        p_draw = p_draw / sum * 100.0;
        p_away = p_away / sum * 100.0;
        // Rounding residue goes to the draw.
        p_draw += 100.0 - (p_home + p_draw + p_away);
        Self {
            p_home,
            p_draw,
            p_away,
        }
    }

    pub fn favourite(&self) -> Outcome {
        if self.p_home >= self.p_draw && self.p_home >= self.p_away {
            Outcome::HomeWin
        } else if self.p_away > self.p_draw {
            Outcome::AwayWin
        } else {
            Outcome::Draw
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    HomeWin,
    Draw,
    AwayWin,
}

/// Independent-Poisson outcome probabilities for a fixture yet to start.
pub fn outcome_probabilities(lambda_home: f64, lambda_away: f64) -> OutcomeProbabilities {
    let (h, d, a) = outcome_probs_poisson(lambda_home, lambda_away, MAX_GOALS);
    OutcomeProbabilities::from_fractions(h, d, a)
}

fn outcome_probs_poisson(lambda_home: f64, lambda_away: f64, max_goals: u32) -> (f64, f64, f64) {
    let pmf_h = poisson_pmf(lambda_home, max_goals);
    let pmf_a = poisson_pmf(lambda_away, max_goals);

    let mut p_home = 0.0;
    let mut p_draw = 0.0;
    let mut p_away = 0.0;

    for (i, p_i) in pmf_h.iter().enumerate() {
        for (j, p_j) in pmf_a.iter().enumerate() {
            let p = p_i * p_j;
            if i > j {
                p_home += p;
            } else if i < j {
                p_away += p;
            } else {
                p_draw += p;
            }
        }
    }

    let sum = p_home + p_draw + p_away;
    if sum > 0.0 {
        (p_home / sum, p_draw / sum, p_away / sum)
    } else {
        (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0)
    }
}

fn poisson_pmf(lambda: f64, max_k: u32) -> Vec<f64> {
    let max_k = max_k as usize;
    let mut out = vec![0.0; max_k + 1];
    let lambda = if lambda.is_finite() { lambda.max(0.0) } else { 0.0 };

    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }

    let sum: f64 = out.iter().sum();
    if sum < 1.0 {
        out[max_k] += 1.0 - sum;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_sum_to_100() {
        let p = outcome_probabilities(1.6, 1.1);
        assert!((p.p_home + p.p_draw + p.p_away - 100.0).abs() < 1e-9);
        assert!(p.p_home > p.p_away);
        assert_eq!(p.favourite(), Outcome::HomeWin);
    }

    #[test]
    fn equal_rates_are_symmetric() {
        let p = outcome_probabilities(1.3, 1.3);
        assert!((p.p_home - p.p_away).abs() < 1e-9);
    }

    #[test]
    fn zero_rates_are_a_certain_draw() {
        let p = outcome_probabilities(0.0, 0.0);
        assert!((p.p_draw - 100.0).abs() < 1e-9);
        assert_eq!(p.favourite(), Outcome::Draw);
    }

    #[test]
    fn pmf_keeps_tail_mass() {
        let pmf = poisson_pmf(6.0, 4);
        let sum: f64 = pmf.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }
}
