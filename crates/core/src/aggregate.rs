use crate::domain::company::CompanyDetail;
use crate::domain::snapshot::{AggregateStats, Snapshot};
use chrono::{DateTime, Utc};

/// Builds a snapshot from one detail slot per listed company.
///
/// `None` slots are lookups that failed upstream: they count toward
/// `total_companies` and nothing else.
pub fn aggregate(details: &[Option<CompanyDetail>], now: DateTime<Utc>) -> Snapshot {
    let mut all_companies_details = Vec::with_capacity(details.len());
    let mut available_companies = Vec::new();

    let mut total_student_accepted: i64 = 0;
    let mut total_max_accepted_student: i64 = 0;
    let mut total_student_register: i64 = 0;
    let mut total_max_register: i64 = 0;
    let mut valid_company_count: usize = 0;

    for detail in details.iter().flatten() {
        let summary = detail.summary();
        if summary.is_available {
            available_companies.push(summary.clone());
        }
        all_companies_details.push(summary);

        if let (Some(accepted), Some(max_accepted)) =
            (detail.student_accepted, detail.max_accepted_student)
        {
            total_student_accepted += accepted;
            total_max_accepted_student += max_accepted;
            total_student_register += detail.student_register.unwrap_or(0);
            total_max_register += detail.max_register.unwrap_or(0);
            valid_company_count += 1;
        }
    }

    let acceptance_ratio = ratio(total_student_accepted, total_max_accepted_student);
    let register_ratio = ratio(total_student_register, total_max_register);
    let total_companies = details.len();

    let acceptance_percentage = percentage(acceptance_ratio);
    let register_percentage = percentage(register_ratio);
    let summary = format!(
        "Total companies: {total_companies} | Acceptance rate: {acceptance_percentage} | Registration rate: {register_percentage}"
    );

    Snapshot {
        available_companies,
        all_companies_details,
        acceptance_stats: AggregateStats {
            total_companies,
            valid_company_count,
            total_student_accepted,
            total_max_accepted_student,
            total_student_register,
            total_max_register,
            acceptance_ratio: fixed4(acceptance_ratio),
            register_ratio: fixed4(register_ratio),
            acceptance_percentage,
            register_percentage,
            summary,
        },
        last_updated: now,
    }
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

// Rounding is half-up: `{:.N}` alone rounds exact ties (0.03125) to even.
fn fixed4(ratio: f64) -> String {
    format!("{:.4}", (ratio * 1e4).round() / 1e4)
}

fn percentage(ratio: f64) -> String {
    format!("{:.2}%", (ratio * 1e4).round() / 1e2)
}
