use kube::CustomResourceExt;

use locust_operator::loadtest::LocustLoadTest;

fn main() {
    print!("{}", serde_yaml::to_string(&LocustLoadTest::crd()).unwrap());
}
