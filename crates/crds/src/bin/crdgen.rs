//! Prints the provider-owned CRDs as a multi-document YAML stream.

use crds::{KubevirtCluster, KubevirtMachine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let documents = [
        serde_yaml::to_string(&KubevirtMachine::crd())?,
        serde_yaml::to_string(&KubevirtCluster::crd())?,
    ];
    for document in documents {
        println!("---\n{document}");
    }
    Ok(())
}
