use forge_chain::{LinkKind, RunReport, StepOutput, StepRecord, report_link_for};
use forge_core::Cluster;

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  "));

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// Step table followed by one explorer link per address and transaction.
pub fn print_report(report: &RunReport) {
    println!("Plan '{}' on {}", report.plan, report.cluster);
    let rows = report
        .steps
        .iter()
        .map(|s| {
            vec![
                s.index.to_string(),
                s.label.clone(),
                s.state.to_string(),
                summary(s),
            ]
        })
        .collect();
    print_table(&["#", "STEP", "STATE", "RESULT"], rows);

    let links: Vec<String> = report
        .steps
        .iter()
        .flat_map(|s| step_links(s, report.cluster, report.rpc_url.as_deref()))
        .collect();
    if !links.is_empty() {
        println!();
        for link in links {
            println!("{link}");
        }
    }
}

fn summary(record: &StepRecord) -> String {
    if let Some(error) = &record.error {
        return error.clone();
    }
    match &record.output {
        Some(StepOutput::Address(address)) => address.to_string(),
        Some(StepOutput::Transaction(tx)) => tx.signature.to_string(),
        Some(StepOutput::Uri(uri)) => uri.to_string(),
        Some(StepOutput::Nft(nft)) => nft.mint.to_string(),
        None => String::new(),
    }
}

/// Explorer links for a step: its output address (if any) and its transaction.
pub fn step_links(record: &StepRecord, cluster: Cluster, rpc_url: Option<&str>) -> Vec<String> {
    let mut links = Vec::new();
    let address = match &record.output {
        Some(StepOutput::Address(address)) => Some(*address),
        Some(StepOutput::Nft(nft)) => Some(nft.mint),
        _ => None,
    };
    if let Some(address) = address {
        links.push(format!(
            "{}: {}",
            record.label,
            report_link_for(LinkKind::Address, &address.to_string(), cluster, rpc_url)
        ));
    }
    if let Some(tx) = &record.transaction {
        links.push(format!("{} transaction: {}", record.label, tx.link));
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_chain::{StepState, TransactionResult};
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;

    fn record(output: Option<StepOutput>, transaction: Option<TransactionResult>) -> StepRecord {
        StepRecord {
            index: 0,
            label: "create mint".into(),
            kind: "create-mint",
            state: StepState::Confirmed,
            transaction,
            output,
            error: None,
        }
    }

    #[test]
    fn links_address_and_transaction() {
        let mint = Pubkey::new_unique();
        let signature = Signature::new_unique();
        let tx = TransactionResult {
            signature,
            link: report_link_for(LinkKind::Transaction, &signature.to_string(), Cluster::Devnet, None),
        };
        let links = step_links(
            &record(Some(StepOutput::Address(mint)), Some(tx)),
            Cluster::Devnet,
            None,
        );

        assert_eq!(links.len(), 2);
        assert!(links[0].contains(&format!("/address/{mint}?cluster=devnet")));
        assert!(links[1].contains(&format!("/tx/{signature}")));
    }

    #[test]
    fn localnet_address_links_follow_the_configured_endpoint() {
        let mint = Pubkey::new_unique();
        let links = step_links(
            &record(Some(StepOutput::Address(mint)), None),
            Cluster::Localnet,
            Some("http://10.0.0.5:9000"),
        );

        assert_eq!(links.len(), 1);
        assert!(links[0].ends_with("?cluster=custom&customUrl=http%3A%2F%2F10.0.0.5%3A9000"));
    }

    #[test]
    fn uploads_have_no_links() {
        let output = StepOutput::Uri(forge_chain::MetadataUri("memory://0/x".into()));
        assert!(step_links(&record(Some(output), None), Cluster::Devnet, None).is_empty());
    }

    #[test]
    fn failed_steps_summarize_the_error() {
        let mut failed = record(None, None);
        failed.state = StepState::Failed;
        failed.error = Some("Resource not found: mint".into());
        assert_eq!(summary(&failed), "Resource not found: mint");
    }
}
