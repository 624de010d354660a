use rand::seq::SliceRandom;
use rand::Rng;
use tessera::{value, Value};

/// Returns `n` random users, keyed by a unique `id`.
pub fn users(n: usize) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|id| {
            let name: String = (0..20).map(|_| rng.gen_range('a'..='z')).collect();
            value! {
                id: id,
                name: name,
                age: rng.gen_range(21..100_i64),
                is_disabled: rng.gen_ratio(1, 4),
            }
        })
        .collect()
}

/// Returns the users in a random order with roughly a tenth of them
/// replaced by new ones.
pub fn shuffle(users: &[Value]) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    let mut users = users.to_vec();
    users.shuffle(&mut rng);
    let fresh = self::users(users.len() / 10);
    let offset = users.len();
    for (i, user) in fresh.into_iter().enumerate() {
        if let Value::Map(mut map) = user {
            map.insert(String::from("id"), Value::from(offset + i));
            users[i] = Value::Map(map);
        }
    }
    users
}
