/// Largest size with the image's aspect ratio that fits inside `screen`.
///
/// `image` is the size after rotation. Degenerate inputs yield `(0, 0)`.
pub fn fit_keep_ratio(image: (u32, u32), screen: (u32, u32)) -> (u32, u32) {
    let (iw, ih) = image;
    let (sw, sh) = screen;
    if iw == 0 || ih == 0 || sw == 0 || sh == 0 {
        return (0, 0);
    }

    let (iw, ih, sw, sh) = (iw as u64, ih as u64, sw as u64, sh as u64);

    // Compare iw/ih against sw/sh without going through floats.
    if iw * sh > sw * ih {
        (sw as u32, (sw * ih / iw).max(1) as u32)
    } else {
        ((sh * iw / ih).max(1) as u32, sh as u32)
    }
}

/// Offset that centres a `size` rectangle on `screen`.
pub fn centered(size: (u32, u32), screen: (u32, u32)) -> (i32, i32) {
    (
        (screen.0 as i32 - size.0 as i32) / 2,
        (screen.1 as i32 - size.1 as i32) / 2,
    )
}
