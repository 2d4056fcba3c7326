use rand::Rng;

/// Length of every ambient loop buffer. Two seconds trades seam audibility
/// against memory; the loop flag, not the seam, is the contract.
pub const LOOP_SECONDS: f32 = 2.0;

fn loop_len(sample_rate: u32) -> usize {
    (sample_rate as f32 * LOOP_SECONDS) as usize
}

/// Uniform white noise in [-1, 1].
pub fn white_loop<R: Rng>(sample_rate: u32, rng: &mut R) -> Vec<f32> {
    (0..loop_len(sample_rate))
        .map(|_| rng.random::<f32>() * 2.0 - 1.0)
        .collect()
}

/// Pink (1/f) noise: Paul Kellett's refined 6-pole recursive filter over
/// white noise, scaled by 0.11 to normalize amplitude.
pub fn pink_loop<R: Rng>(sample_rate: u32, rng: &mut R) -> Vec<f32> {
    let mut b = [0.0f32; 7];
    (0..loop_len(sample_rate))
        .map(|_| {
            let white = rng.random::<f32>() * 2.0 - 1.0;
            b[0] = 0.99886 * b[0] + white * 0.0555179;
            b[1] = 0.99332 * b[1] + white * 0.0750759;
            b[2] = 0.96900 * b[2] + white * 0.1538520;
            b[3] = 0.86650 * b[3] + white * 0.3104856;
            b[4] = 0.55000 * b[4] + white * 0.5329522;
            b[5] = -0.7616 * b[5] - white * 0.0168980;
            let pink = b.iter().sum::<f32>() + white * 0.5362;
            b[6] = white * 0.115926;
            pink * 0.11
        })
        .collect()
}

/// Brown noise: first-order leaky integrator of white noise, boosted ×3.5
/// to compensate for the integrator's low-pass attenuation.
pub fn brown_loop<R: Rng>(sample_rate: u32, rng: &mut R) -> Vec<f32> {
    let mut last = 0.0f32;
    (0..loop_len(sample_rate))
        .map(|_| {
            let white = rng.random::<f32>() * 2.0 - 1.0;
            last = (last + 0.02 * white) / 1.02;
            last * 3.5
        })
        .collect()
}
