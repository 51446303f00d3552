use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = vec![challenge_manager::crds::Challenge::crd()];
    print!("{}", serde_yaml::to_string(&crds)?);
    Ok(())
}
