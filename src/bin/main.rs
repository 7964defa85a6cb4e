use loan_origination_orchestrator::{
    models::{ApplicantProfile, LoanApplicationRequest, PropertyDetails, RunStatus},
    OrchestratorConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Loan Origination Orchestrator starting");

    let orchestrator = OrchestratorConfig::from_env()?.build_orchestrator()?;

    // Sample application
    let request = LoanApplicationRequest {
        customer_name: "Kala Divan".to_string(),
        loan_amount: 4_000_000.0,
        loan_purpose: "Home Loan".to_string(),
        tenure_years: 20,
        contact_number: Some("+91-9876543210".to_string()),
        email: Some("kala.divan@example.com".to_string()),
        profile: ApplicantProfile {
            age: Some(30),
            monthly_income: Some(150_000.0),
            existing_emis: Some(0.0),
            employment_years: Some(5.0),
            employment_type: Some("Salaried".to_string()),
            cibil_score: Some(720),
            property: Some(PropertyDetails::default()),
            document_ids: vec![
                "pan_card".to_string(),
                "aadhaar".to_string(),
                "salary_slips".to_string(),
                "bank_statements".to_string(),
                "sale_agreement".to_string(),
            ],
        },
    };

    info!(
        customer = %request.customer_name,
        loan_amount = request.loan_amount,
        "Running pipeline"
    );

    let run = orchestrator.run(request).await?;

    println!("\n=== PIPELINE RESULT ===");
    println!("Run ID: {}", run.run_id);
    println!("State: {}", run.state);

    println!("\nStages:");
    for (i, result) in run.stages.iter().enumerate() {
        println!("  {}: {:?} ({} ms) {}", i + 1, result.stage, result.elapsed_ms, result.rationale);
    }

    if let Some(verdict) = &run.verdict {
        println!("\nDecision: {}", verdict.decision);
        println!("Composite Score: {:.2}", verdict.composite_score);
        if let Some(rate) = verdict.interest_rate {
            println!("Interest Rate: {:.2}%", rate);
        }
        println!("Approval Authority: {:?}", verdict.approval_authority);
        for check in &verdict.policy_checks {
            println!(
                "  [{}] {}: {} (limit {})",
                if check.passed { "PASS" } else { "FAIL" },
                check.policy,
                check.value,
                check.limit
            );
        }
    }

    if let Some(offer) = &run.offer {
        println!("\nOffer: {}", offer.offer_reference);
        println!("Principal: {:.2}", offer.principal);
        println!("Tenure: {} months at {:.2}%", offer.tenure_months, offer.annual_rate);
        println!("EMI: {:.2}", offer.emi);
        println!("Total Interest: {:.2}", offer.total_interest);
        println!("Total Fees: {:.2}", offer.total_fees);
        println!("Valid Until: {}", offer.valid_until);
        println!("First EMI: {}", offer.first_emi_date);
    }

    if run.status == RunStatus::Failed {
        if let Some(failure) = &run.failure {
            eprintln!("Pipeline failed at {:?}: {}", failure.stage, failure.reason);
        }
        return Err("pipeline failed".into());
    }

    Ok(())
}
