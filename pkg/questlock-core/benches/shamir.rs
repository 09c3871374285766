/*
 * questlock: threshold-split credentials released through real-world quests
 * Copyright (C) 2018-2022 Aleksa Sarai <cyphar@cyphar.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::time::Duration;

use questlock_core::shamir::{combine, split};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{distributions::Standard, Rng};

fn random_secret(len: usize) -> Vec<u8> {
    rand::thread_rng().sample_iter(Standard).take(len).collect()
}

fn benchmark_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("shamir split");
    let secret = random_secret(1 << 12);
    for threshold in (10..=40).step_by(10) {
        let shares = threshold + 5;
        group.measurement_time(Duration::new(20, 0));
        group.throughput(Throughput::Bytes(secret.len() as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("N={:03}", shares), format!("K={:03}", threshold)),
            &secret,
            |b, secret| b.iter(|| split(black_box(secret), shares, threshold).unwrap()),
        );
    }
    group.finish()
}

fn benchmark_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("shamir combine");
    let secret = random_secret(1 << 12);
    for threshold in (5..=65).step_by(10) {
        let shares = split(&secret, threshold, threshold).unwrap();
        group.throughput(Throughput::Bytes(secret.len() as u64));
        group.measurement_time(Duration::new(20 + threshold as u64, 0));
        group.bench_with_input(
            format!("K={:03}", threshold),
            &shares,
            |b, shares| b.iter(|| black_box(combine(shares).unwrap())),
        );
    }
    group.finish()
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(100);
    targets = benchmark_split, benchmark_combine
}
criterion_main!(benches);
