use consolop_oidc::crd::Authentication;
use consolop_operator::crd::Console;

use kube::CustomResourceExt;

fn main() {
    for crd in [Console::crd(), Authentication::crd()] {
        // safe unwrap: we know CRD is serializable
        print!("---\n{}\n", serde_yaml::to_string(&crd).unwrap());
    }
}
